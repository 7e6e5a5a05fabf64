//! Error types for tracedeck.
//!
//! Library crates use [`TraceDeckError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all tracedeck operations.
#[derive(Debug, thiserror::Error)]
pub enum TraceDeckError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A precondition gate or uniqueness check failed on the request path.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A referenced app, job, or frame is absent from storage.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// An external tool could not be spawned or exited unsuccessfully.
    #[error("process error: {0}")]
    Process(String),

    /// Source checkout failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad request field, missing tool output, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TraceDeckError>;

impl TraceDeckError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a conflict error from any displayable message.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given kind of record.
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should be reported to a caller as a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this error should be reported to a caller as a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TraceDeckError::config("missing work root");
        assert_eq!(err.to_string(), "config error: missing work root");

        let err = TraceDeckError::not_found("trace", "demo-trace-1");
        assert_eq!(err.to_string(), "trace not found: demo-trace-1");
        assert!(err.is_not_found());

        let err = TraceDeckError::conflict("capture already active for demo");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("already active"));
    }

    #[test]
    fn serde_errors_convert() {
        let err: TraceDeckError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, TraceDeckError::Serialization(_)));
    }
}
