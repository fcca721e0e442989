//! Error types for media-meta

use std::io;

/// Result type for media-meta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, parsing or dispatching metadata requests
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A seek or read went outside the buffer
    #[error("Out of bounds: position {position} outside buffer of {length} bytes")]
    OutOfBounds { position: i64, length: usize },

    /// Header bytes do not carry the expected magic for the selected format
    #[error("Signature mismatch for {format}: {reason}")]
    SignatureMismatch {
        format: &'static str,
        reason: String,
    },

    /// Invalid file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// No registered parser accepts the resource
    #[error("Unsupported format")]
    UnsupportedFormat,

    /// The resource identifier could not be resolved to a readable file
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed message or a closed channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A filter pattern failed to compile
    #[error("Invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Shorthand for a signature mismatch in `format`
    pub(crate) fn signature(format: &'static str, reason: impl Into<String>) -> Self {
        Error::SignatureMismatch {
            format,
            reason: reason.into(),
        }
    }
}
