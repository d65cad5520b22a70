//! Error types for webharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`. The CLI app wraps
//! this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::RecordStatus;

/// Top-level error type for all webharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during discovery or fetching.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Record store, blob store, or analytics sink error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Vector index collaborator error.
    #[error("index error: {0}")]
    Index(String),

    /// A status write that would move a record backward or sideways.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: RecordStatus,
        to: RecordStatus,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed URL, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing start URL");
        assert_eq!(err.to_string(), "config error: missing start URL");

        let err = HarvestError::InvalidTransition {
            from: RecordStatus::Indexed,
            to: RecordStatus::Scraped,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition: indexed -> scraped"
        );
    }
}
