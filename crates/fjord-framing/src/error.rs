//! Error types for fjord-framing.

use thiserror::Error;

/// Result type for framing operations.
pub type Result<T> = std::result::Result<T, FramingError>;

/// Decode errors. All of them are recoverable: the reader is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Fewer bytes remain than the read requested.
    #[error("buffer underflow: requested {requested} bytes, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },

    /// The packet is smaller than the value it is being viewed as.
    #[error("packet too small: need {needed} bytes, have {actual}")]
    TooSmall { needed: usize, actual: usize },

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 { offset: usize },
}
