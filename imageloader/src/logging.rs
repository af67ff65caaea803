//! Logging setup for applications embedding the loader.
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want to see them can install a subscriber here:
//! - writes to `<log_dir>/<log_file>` (truncated at start)
//! - mirrors to stdout
//! - level filter from `RUST_LOG`, defaulting to `info`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    /// Path of the log file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be prepared or a global subscriber is
/// already installed.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    let path = prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        path,
    })
}

/// Builds the level filter from `RUST_LOG`, or `default` when unset or
/// invalid.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Creates `log_dir` if needed and truncates the log file.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file);
    fs::write(&path, "")?;
    Ok(path)
}

/// Default log directory.
pub fn default_log_dir() -> &'static Path {
    Path::new("logs")
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "imageloader.log"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), Path::new("logs"));
        assert_eq!(default_log_file(), "imageloader.log");
    }

    #[test]
    fn test_prepare_creates_directory_and_file() {
        let root = tempfile::tempdir().unwrap();
        let log_dir = root.path().join("nested").join("logs");

        let path = prepare_log_file(&log_dir, "test.log").unwrap();

        assert!(log_dir.exists());
        assert_eq!(path, log_dir.join("test.log"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_existing_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("test.log");
        fs::write(&path, "old log data").unwrap();

        prepare_log_file(root.path(), "test.log").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
