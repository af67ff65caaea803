//! Task and fetch priority.

use std::fmt;
use std::str::FromStr;

/// Scheduling priority of a task.
///
/// Ordered from lowest to highest so that `max()` across attached tasks
/// yields the priority a shared fetch should run at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl Priority {
    /// Floor used for an operation with no attached tasks.
    pub const LOWEST: Priority = Priority::VeryLow;

    /// Returns the highest priority in `priorities`, or [`Priority::LOWEST`]
    /// when empty.
    pub fn max_of(priorities: impl IntoIterator<Item = Priority>) -> Priority {
        priorities.into_iter().max().unwrap_or(Self::LOWEST)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::VeryLow => write!(f, "very_low"),
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::VeryHigh => write!(f, "very_high"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "very_low" => Ok(Priority::VeryLow),
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "very_high" => Ok(Priority::VeryHigh),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::VeryLow < Priority::Low);
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::VeryHigh);
    }

    #[test]
    fn test_max_of_empty_is_floor() {
        assert_eq!(Priority::max_of(Vec::new()), Priority::LOWEST);
    }

    #[test]
    fn test_max_of_picks_highest() {
        let p = Priority::max_of([Priority::Low, Priority::VeryHigh, Priority::Normal]);
        assert_eq!(p, Priority::VeryHigh);
    }

    #[test]
    fn test_parse_round_trips_display() {
        for p in [
            Priority::VeryLow,
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::VeryHigh,
        ] {
            assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
        }
        assert_eq!("Very-High".parse::<Priority>().unwrap(), Priority::VeryHigh);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
