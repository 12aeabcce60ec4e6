//! Error types for `OAuth2` operations.

use std::io;
use std::path::PathBuf;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from server.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Invalid token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Authorization timeout.
    #[error("Authorization timed out after {0} seconds")]
    Timeout(u64),

    /// User denied authorization.
    #[error("User denied authorization: {0}")]
    AccessDenied(String),

    /// The redirect did not carry an authorization code.
    #[error("Authorization code not found in the redirect")]
    MissingCode,

    /// The redirect's `state` did not match the one we sent.
    #[error("State mismatch in authorization redirect")]
    StateMismatch,

    /// The browser could not be launched.
    #[error("Could not open browser: {0}")]
    Browser(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored token file exists but cannot be decoded.
    #[error("Token file {} is corrupt: {source}", path.display())]
    CorruptToken {
        /// Path of the token file.
        path: PathBuf,
        /// Decoding error.
        source: serde_json::Error,
    },

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if the authorization server no longer accepts the
    /// grant (revoked or expired refresh token). Only a new interactive
    /// login fixes this.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::OAuth { error, .. } if error == "invalid_grant")
    }
}
