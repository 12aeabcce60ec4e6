//! Turning an accepted SMTP transaction into a mail API call.
//!
//! The dispatcher rewrites the `To` header so that it lists every
//! envelope recipient, encodes the message and submits it. The provider
//! only reads the encoded message, so this is what makes every envelope
//! recipient receive it. The price is that recipients given only in the
//! envelope (blind copies) become visible to everyone else.

mod api;
mod gmail;

use std::net::IpAddr;

use smog_mime::encoding::encode_raw;
use smog_smtp::{Reply, ReplyCode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use api::{ApiError, MailApi};
pub use gmail::{DEFAULT_GMAIL_BASE_URL, GmailClient, UNKNOWN_MESSAGE_ID};

/// Why a message was not relayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The provider's sending quota is used up. Retrying later works.
    #[error("mail API quota exhausted: {0}")]
    QuotaExceeded(String),

    /// The stored credential no longer works. The operator has to log in
    /// again.
    #[error("mail API rejected the stored credential: {0}")]
    AuthRequired(String),

    /// Anything else that may go away on its own.
    #[error("temporary relay failure: {0}")]
    Transient(String),

    /// The message itself was refused.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The message is larger than the configured limit.
    #[error("message exceeds the limit of {limit} bytes")]
    SizeExceeded {
        /// Largest raw size accepted, in bytes.
        limit: u64,
    },
}

impl RelayError {
    /// Short name used in log lines.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::QuotaExceeded(_) => "quota",
            Self::AuthRequired(_) => "auth",
            Self::Transient(_) => "transient",
            Self::Rejected(_) => "rejected",
            Self::SizeExceeded { .. } => "size",
        }
    }

    /// Reply sent to the SMTP client.
    ///
    /// Provider messages stay in the log; the client only gets the class
    /// of failure.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        match self {
            Self::QuotaExceeded(_) => Reply::new(
                ReplyCode::INSUFFICIENT_STORAGE,
                "4.3.1 Service temporarily unavailable due to quota limits",
            ),
            Self::AuthRequired(_) => Reply::new(
                ReplyCode::AUTH_FAILED,
                "5.7.0 Authentication required - please run 'smog auth login'",
            ),
            Self::Transient(_) => Reply::new(
                ReplyCode::LOCAL_ERROR,
                "4.3.0 Temporary failure relaying message",
            ),
            Self::Rejected(_) => Reply::new(
                ReplyCode::TRANSACTION_FAILED,
                "5.6.0 Message rejected by the mail service",
            ),
            Self::SizeExceeded { limit } => Reply::new(
                ReplyCode::EXCEEDED_STORAGE,
                format!("5.3.4 Message size exceeds limit of {limit} bytes"),
            ),
        }
    }
}

/// Maps a provider failure onto a [`RelayError`].
///
/// Quota problems are checked first: Google reports some of them with a
/// 403 whose reason mentions the limit.
#[must_use]
pub fn classify(err: &ApiError) -> RelayError {
    let text = err.message.to_ascii_lowercase();
    let message = err.to_string();

    if err.status == Some(429) || text.contains("quota") || text.contains("limitexceeded") {
        return RelayError::QuotaExceeded(message);
    }

    if err.status == Some(401)
        || ["authentication", "unauthenticated", "invalid_grant"]
            .iter()
            .any(|needle| text.contains(needle))
    {
        return RelayError::AuthRequired(message);
    }

    if err.status == Some(400) {
        return RelayError::Rejected(message);
    }

    RelayError::Transient(message)
}

/// Submits accepted transactions through a [`MailApi`].
#[derive(Debug)]
pub struct Dispatcher<A> {
    api: A,
}

impl<A: MailApi> Dispatcher<A> {
    /// Creates a dispatcher.
    pub const fn new(api: A) -> Self {
        Self { api }
    }

    /// Returns the underlying API client.
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Relays one message.
    ///
    /// The `To` header is replaced by `recipients` joined with `", "`
    /// (removed when there are none), the body is left untouched, and the
    /// result is submitted. Returns the provider's message id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Rejected`] if the header block cannot be
    /// parsed, otherwise the classification of the provider failure.
    pub async fn dispatch(
        &self,
        client_ip: IpAddr,
        from: &str,
        recipients: &[String],
        raw: &[u8],
    ) -> Result<String, RelayError> {
        let message = smog_mime::rewrite_recipients(raw, recipients).map_err(|e| {
            warn!(client_ip = %client_ip, from, error = %e, "unable to parse message headers");
            RelayError::Rejected(format!("unparsable message: {e}"))
        })?;

        let encoded = encode_raw(&message);
        debug!(
            client_ip = %client_ip,
            size = raw.len(),
            encoded_size = encoded.len(),
            "submitting message to mail API"
        );

        match self.api.send_raw(&encoded).await {
            Ok(message_id) => {
                info!(
                    client_ip = %client_ip,
                    from,
                    to = ?recipients,
                    size = raw.len(),
                    message_id = %message_id,
                    "message relayed successfully"
                );
                Ok(message_id)
            }
            Err(e) => {
                let err = classify(&e);
                error!(
                    client_ip = %client_ip,
                    from,
                    to = ?recipients,
                    class = err.class(),
                    error = %e,
                    "failed to relay message"
                );
                if matches!(err, RelayError::AuthRequired(_)) {
                    error!("the stored Google credential is no longer accepted; run 'smog auth login'");
                }
                Err(err)
            }
        }
    }
}
