//! `OAuth2` authorization flows.
//!
//! [`AuthorizationCodeFlow`] builds the consent URL and exchanges the
//! returned code. How the code gets back to us is up to one of the two
//! receivers: [`LoopbackListener`] catches the browser redirect on a
//! local port, [`manual::read_code`] takes a code pasted by the operator.

mod code;
mod loopback;
pub mod manual;
mod pkce;

pub use code::AuthorizationCodeFlow;
pub use loopback::{DEFAULT_LOOPBACK_PORT, LoopbackListener, open_browser};
pub use pkce::PkceChallenge;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use reqwest::Client;
use tracing::debug;

/// Upper bound on a single token endpoint request.
pub const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
    request_timeout: Duration,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            provider,
            http_client: Client::new(),
            request_timeout: TOKEN_REQUEST_TIMEOUT,
        }
    }

    /// Overrides [`TOKEN_REQUEST_TIMEOUT`] for code exchange and refresh.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Refreshes an access token using a refresh token.
    ///
    /// The returned token keeps the old refresh token when the server does
    /// not rotate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh fails or if the token has no refresh
    /// token. A revoked grant surfaces as an [`Error::OAuth`] for which
    /// [`Error::is_invalid_grant`] is true.
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token()?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!(provider = %self.provider.name, "refreshing access token");
        let mut new_token = self.token_request(&params).await?;

        if new_token.refresh_token.is_none() {
            new_token.refresh_token.clone_from(&token.refresh_token);
        }

        Ok(new_token)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub(crate) async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!(provider = %self.provider.name, "exchanging authorization code");
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .timeout(self.request_timeout)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(serde_json::from_str::<ErrorResponse>(&body).map_or_else(
                |_| Error::InvalidResponse(format!("token endpoint returned {status}: {body}")),
                ErrorResponse::into_error,
            ));
        }

        let token_response: TokenResponse = response.json().await?;
        Token::from_response(token_response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> OAuthClient {
        let provider = Provider::new(
            "Test",
            format!("{}/auth", server.uri()),
            format!("{}/token", server.uri()),
        )
        .unwrap();
        OAuthClient::new("cid", provider).with_client_secret("secret")
    }

    #[test]
    fn test_oauth_client_with_secret() {
        let provider = Provider::google().unwrap();
        let client = OAuthClient::new("test_client_id", provider).with_client_secret("secret");
        assert_eq!(client.client_id, "test_client_id");
        assert_eq!(client.client_secret.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let old = Token::new("a1", "Bearer").with_refresh_token("r1");
        let new = client(&server).await.refresh_token(&old).await.unwrap();
        assert_eq!(new.access_token, "a2");
        assert_eq!(new.refresh_token.as_deref(), Some("r1"));
        assert!(new.is_valid());
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let old = Token::new("a1", "Bearer").with_refresh_token("r1");
        let err = client(&server).await.refresh_token(&old).await.unwrap_err();
        assert!(err.is_invalid_grant(), "{err}");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let server = MockServer::start().await;
        let err = client(&server)
            .await
            .refresh_token(&Token::new("a1", "Bearer"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoRefreshToken));
    }

    #[tokio::test]
    async fn test_unresponsive_token_endpoint_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let provider = Provider::new(
            "Test",
            format!("http://{addr}/auth"),
            format!("http://{addr}/token"),
        )
        .unwrap();
        let client = OAuthClient::new("cid", provider)
            .with_request_timeout(Duration::from_millis(200));

        let old = Token::new("a1", "Bearer").with_refresh_token("r1");
        let err = tokio::time::timeout(Duration::from_secs(5), client.refresh_token(&old))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Http(ref e) if e.is_timeout()), "{err}");
    }

    #[test]
    fn test_default_request_timeout() {
        let client = OAuthClient::new("cid", Provider::google().unwrap());
        assert_eq!(client.request_timeout, TOKEN_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .exchange_code("c", "http://127.0.0.1:1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(ref m) if m.contains("502")));
    }
}
