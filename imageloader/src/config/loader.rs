//! Loader and command executor configuration.

use crate::request::Priority;
use std::time::Duration;

/// Default fraction of the expected bytes that must arrive before the first
/// progressive decode attempt.
pub const DEFAULT_PROGRESSIVE_THRESHOLD: f64 = 0.15;

/// Default pause between consecutive transport commands.
pub const DEFAULT_COMMAND_INTERVAL: Duration = Duration::from_millis(3);

/// Default priority of preheating tasks.
pub const DEFAULT_PREHEATING_PRIORITY: Priority = Priority::VeryLow;

/// Default processing parallelism: one job per available CPU core.
pub fn default_max_concurrent_processing() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// =============================================================================
// Command Config
// =============================================================================

/// Configuration for the [`CommandExecutor`](crate::command::CommandExecutor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    interval: Duration,
}

impl CommandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pause between two executed commands.
    ///
    /// Default: 3 ms.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_COMMAND_INTERVAL,
        }
    }
}

// =============================================================================
// Loader Config
// =============================================================================

/// Configuration for the [`LoadCoordinator`](crate::loader::LoadCoordinator).
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Decode partial images while bytes arrive
    progressive_decoding: bool,
    /// Fraction of expected bytes before the first partial decode
    progressive_threshold: f64,
    /// Maximum processing jobs running at once
    max_concurrent_processing: usize,
    /// Priority of preheating tasks
    preheating_priority: Priority,
    /// Transport command pacing
    commands: CommandConfig,
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable progressive decoding.
    ///
    /// Even when enabled, partial decodes only run for operations with at
    /// least one task that asked for partial images. Default: disabled.
    pub fn with_progressive_decoding(mut self, enabled: bool) -> Self {
        self.progressive_decoding = enabled;
        self
    }

    /// Set the progressive decoding threshold.
    ///
    /// Clamped to `0.0..=1.0`. Default: 0.15.
    pub fn with_progressive_threshold(mut self, threshold: f64) -> Self {
        self.progressive_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum number of concurrent processing jobs (at least 1).
    pub fn with_max_concurrent_processing(mut self, max: usize) -> Self {
        self.max_concurrent_processing = max.max(1);
        self
    }

    /// Set the priority used for preheating tasks.
    pub fn with_preheating_priority(mut self, priority: Priority) -> Self {
        self.preheating_priority = priority;
        self
    }

    pub fn with_commands(mut self, commands: CommandConfig) -> Self {
        self.commands = commands;
        self
    }

    pub fn progressive_decoding(&self) -> bool {
        self.progressive_decoding
    }

    pub fn progressive_threshold(&self) -> f64 {
        self.progressive_threshold
    }

    pub fn max_concurrent_processing(&self) -> usize {
        self.max_concurrent_processing
    }

    pub fn preheating_priority(&self) -> Priority {
        self.preheating_priority
    }

    pub fn commands(&self) -> CommandConfig {
        self.commands
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            progressive_decoding: false,
            progressive_threshold: DEFAULT_PROGRESSIVE_THRESHOLD,
            max_concurrent_processing: default_max_concurrent_processing(),
            preheating_priority: DEFAULT_PREHEATING_PRIORITY,
            commands: CommandConfig::default(),
        }
    }
}
