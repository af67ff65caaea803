//! Error types for the image loader.
//!
//! A single fetch may serve many tasks, so every error that reaches a task is
//! `Clone`: the coordinator fans the same value out to all attached tasks
//! without translating it.
//!
//! Several outcomes are deliberately *not* errors:
//! - a decoder that cannot produce an image from non-empty bytes yields a
//!   response with neither image nor error
//! - a processor that declines to process passes the raw image through
//! - a cancelled task simply receives no further events

use thiserror::Error;

/// Errors delivered to a task on completion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The fetcher reported a transport failure.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    /// The configured fetcher does not accept this request.
    #[error("no fetcher can handle resource '{resource}'")]
    Unsupported { resource: String },
}

/// Error reported by a [`Fetcher`](crate::traits::Fetcher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    /// Human-readable error message.
    pub message: String,
    /// Whether a retry could succeed (transient failure).
    pub is_retryable: bool,
}

impl FetchError {
    /// Creates a retryable error (transient failure like a network timeout).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_retryable: true,
        }
    }

    /// Creates a permanent error (won't succeed on retry).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_retryable: false,
        }
    }
}

/// Errors constructing a [`CompositeTask`](crate::composite::CompositeTask).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositeError {
    /// A composite task needs at least one underlying task.
    #[error("composite task requires at least one request")]
    NoRequests,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_constructors() {
        let transient = FetchError::retryable("timeout");
        assert!(transient.is_retryable);
        assert_eq!(transient.to_string(), "timeout");

        let fatal = FetchError::permanent("404");
        assert!(!fatal.is_retryable);
    }

    #[test]
    fn test_load_error_from_fetch_error() {
        let err: LoadError = FetchError::permanent("connection reset").into();
        assert_eq!(err.to_string(), "fetch failed: connection reset");
    }

    #[test]
    fn test_unsupported_message_names_resource() {
        let err = LoadError::Unsupported {
            resource: "ftp://example.com/a.png".to_string(),
        };
        assert!(err.to_string().contains("ftp://example.com/a.png"));
    }
}
