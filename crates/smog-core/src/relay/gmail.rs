//! Gmail REST implementation of [`MailApi`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use smog_oauth::{OAuthClient, Token};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::api::{ApiError, MailApi};
use crate::error::Result;

/// Production Gmail API endpoint.
pub const DEFAULT_GMAIL_BASE_URL: &str = "https://gmail.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Message id reported when Gmail accepts a message without a readable id.
pub const UNKNOWN_MESSAGE_ID: &str = "unknown";

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Flattens a Gmail error body into one line that keeps the status and
/// reasons the relay classifies on.
fn error_message(body: &str) -> String {
    let Ok(ErrorEnvelope { error }) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return body.trim().to_string();
    };

    let mut parts = Vec::new();
    if !error.message.is_empty() {
        parts.push(error.message);
    }
    if !error.status.is_empty() {
        parts.push(format!("status: {}", error.status));
    }
    let reasons: Vec<_> = error
        .errors
        .into_iter()
        .map(|e| e.reason)
        .filter(|r| !r.is_empty())
        .collect();
    if !reasons.is_empty() {
        parts.push(format!("reason: {}", reasons.join(", ")));
    }

    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join("; ")
    }
}

/// Sends messages through `users.messages.send` as the authorized user.
///
/// The access token is refreshed with the stored refresh token whenever
/// it has expired. Refreshed tokens are kept in memory only.
#[derive(Debug)]
pub struct GmailClient {
    http: Client,
    base_url: String,
    oauth: OAuthClient,
    token: RwLock<Token>,
}

impl GmailClient {
    /// Creates a client for the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(oauth: OAuthClient, token: Token) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_GMAIL_BASE_URL.to_string(),
            oauth,
            token: RwLock::new(token),
        })
    }

    /// Points the client at another endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns a copy of the token currently in use.
    pub async fn token(&self) -> Token {
        self.token.read().await.clone()
    }

    async fn access_token(&self) -> std::result::Result<String, ApiError> {
        {
            let token = self.token.read().await;
            if token.is_valid() {
                return Ok(token.access_token.clone());
            }
        }

        let mut token = self.token.write().await;
        // Another send may have refreshed while we waited for the lock.
        if token.is_valid() {
            return Ok(token.access_token.clone());
        }

        debug!("access token expired, refreshing");
        let refreshed = self.oauth.refresh_token(&token).await.map_err(|e| {
            warn!(error = %e, "access token refresh failed");
            if e.is_invalid_grant() || matches!(e, smog_oauth::Error::NoRefreshToken) {
                ApiError::new(401, format!("token refresh failed: {e}"))
            } else {
                ApiError::transport(format!("token refresh failed: {e}"))
            }
        })?;

        info!(expires_at = ?refreshed.expires_at, "access token refreshed");
        *token = refreshed;
        Ok(token.access_token.clone())
    }
}

impl MailApi for GmailClient {
    async fn send_raw(&self, raw: &str) -> std::result::Result<String, ApiError> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/gmail/v1/users/me/messages/send",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&SendRequest { raw })
            .send()
            .await
            .map_err(|e| ApiError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::new(status.as_u16(), error_message(&body)));
        }

        // Already accepted; an error here would only cause a duplicate.
        match response.json::<SendResponse>().await {
            Ok(sent) => Ok(sent.id),
            Err(e) => {
                warn!(
                    status = status.as_u16(),
                    error = %e,
                    "message accepted but send response was unreadable"
                );
                Ok(UNKNOWN_MESSAGE_ID.to_string())
            }
        }
    }
}
