//! Error types for confpush-core.

use std::path::PathBuf;

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The watched file is missing, unreadable, or not valid UTF-8.
    #[error("File unavailable: {}: {source}", .path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The watched file does not contain a valid JSON document.
    #[error("Malformed payload in {}: {source}", .path.display())]
    MalformedPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Truncated frame: expected at least {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
