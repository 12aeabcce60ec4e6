//! Error types for message handling.

/// Result type alias for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line that is neither a field nor a continuation.
    #[error("Invalid header on line {line}: {reason}")]
    InvalidHeader {
        /// 1-based line number within the header block.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The message has no header block at all.
    #[error("Message is empty")]
    Empty,

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
