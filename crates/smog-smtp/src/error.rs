//! Error types for SMTP operations.

use std::io;

use crate::types::Reply;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reply that should be sent to the client before giving up on the
    /// current command.
    #[error("SMTP error {}: {}", .0.code, .0.message_text())]
    Reply(Reply),

    /// Protocol error (malformed command or arguments).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Client line exceeded the maximum length.
    #[error("Line too long: more than {0} bytes")]
    LineTooLong(usize),

    /// Client did not send anything within the read timeout.
    #[error("Timed out waiting for client")]
    Timeout,

    /// Client closed the connection.
    #[error("Connection closed by client")]
    ConnectionClosed,
}

impl Error {
    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if the connection can no longer be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout | Self::ConnectionClosed)
    }
}
