//! Mail API capability.

use std::fmt;
use std::future::Future;

/// Something that accepts a complete message for delivery.
///
/// The relay only needs "send this raw message and tell me its id", so
/// tests can stand in for Gmail with a recording fake.
pub trait MailApi: Send + Sync + 'static {
    /// Submits a message encoded with the unpadded URL-safe base64
    /// alphabet and returns the id the provider assigned to it.
    fn send_raw(&self, raw: &str) -> impl Future<Output = Result<String, ApiError>> + Send;
}

/// Failure reported by a [`MailApi`].
///
/// `status` is the HTTP status when the provider answered at all;
/// transport failures and refresh errors without a response have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code.
    pub status: Option<u16>,
    /// Provider message, including any machine-readable reasons.
    pub message: String,
}

impl ApiError {
    /// Creates an error for an HTTP response.
    #[must_use]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates an error for a request that never got a response.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "mail API returned {status}: {}", self.message),
            None => write!(f, "mail API request failed: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}
