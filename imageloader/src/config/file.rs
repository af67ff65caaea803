//! Loading [`LoaderConfig`] from an INI file.
//!
//! ```ini
//! [loader]
//! progressive_decoding = true
//! progressive_threshold = 0.2
//! max_concurrent_processing = 4
//! preheating_priority = low
//!
//! [commands]
//! interval_ms = 5
//! ```
//!
//! Missing sections and keys keep their defaults.

use super::loader::{CommandConfig, LoaderConfig};
use crate::request::Priority;
use ini::Ini;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Load configuration from `path`.
///
/// If the file doesn't exist, returns defaults.
pub fn load_config(path: &Path) -> Result<LoaderConfig, ConfigError> {
    if !path.exists() {
        return Ok(LoaderConfig::default());
    }
    let ini = Ini::load_from_file(path)?;
    parse_config(&ini)
}

/// Parse an `Ini` object into a `LoaderConfig`.
///
/// Starts from `LoaderConfig::default()` and overlays any values found.
pub fn parse_config(ini: &Ini) -> Result<LoaderConfig, ConfigError> {
    let mut config = LoaderConfig::default();

    // [loader] section
    if let Some(section) = ini.section(Some("loader")) {
        if let Some(v) = section.get("progressive_decoding") {
            let enabled = parse_bool("loader", "progressive_decoding", v)?;
            config = config.with_progressive_decoding(enabled);
        }
        if let Some(v) = section.get("progressive_threshold") {
            const REASON: &str = "must be a number between 0.0 and 1.0";
            let threshold: f64 = parse_value("loader", "progressive_threshold", v, REASON)?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(invalid("loader", "progressive_threshold", v, REASON));
            }
            config = config.with_progressive_threshold(threshold);
        }
        if let Some(v) = section.get("max_concurrent_processing") {
            const REASON: &str = "must be a positive integer";
            let max: usize = parse_value("loader", "max_concurrent_processing", v, REASON)?;
            if max == 0 {
                return Err(invalid("loader", "max_concurrent_processing", v, REASON));
            }
            config = config.with_max_concurrent_processing(max);
        }
        if let Some(v) = section.get("preheating_priority") {
            let priority: Priority = parse_value(
                "loader",
                "preheating_priority",
                v,
                "must be one of: very_low, low, normal, high, very_high",
            )?;
            config = config.with_preheating_priority(priority);
        }
    }

    // [commands] section
    if let Some(section) = ini.section(Some("commands")) {
        if let Some(v) = section.get("interval_ms") {
            let ms: u64 = parse_value(
                "commands",
                "interval_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
            let commands = CommandConfig::new().with_interval(Duration::from_millis(ms));
            config = config.with_commands(commands);
        }
    }

    Ok(config)
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(content: &str) -> Result<LoaderConfig, ConfigError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_config(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), LoaderConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            "[loader]\n\
             progressive_decoding = yes\n\
             progressive_threshold = 0.25\n\
             max_concurrent_processing = 3\n\
             preheating_priority = low\n\
             [commands]\n\
             interval_ms = 7\n",
        )
        .unwrap();

        assert!(config.progressive_decoding());
        assert_eq!(config.progressive_threshold(), 0.25);
        assert_eq!(config.max_concurrent_processing(), 3);
        assert_eq!(config.preheating_priority(), Priority::Low);
        assert_eq!(config.commands().interval(), Duration::from_millis(7));
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let err = parse("[loader]\nprogressive_threshold = 2.0\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "loader");
                assert_eq!(key, "progressive_threshold");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_bool_and_priority() {
        assert!(parse("[loader]\nprogressive_decoding = maybe\n").is_err());
        assert!(parse("[loader]\npreheating_priority = urgent\n").is_err());
        assert!(parse("[loader]\nmax_concurrent_processing = 0\n").is_err());
        assert!(parse("[commands]\ninterval_ms = -1\n").is_err());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("missing.ini")).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[loader]\nprogressive_decoding = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.progressive_decoding());
    }
}
