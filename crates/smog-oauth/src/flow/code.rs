//! Authorization Code Flow implementation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use url::Url;

use super::{OAuthClient, PkceChallenge};
use crate::error::Result;
use crate::token::Token;

/// Authorization Code Flow for `OAuth2`.
///
/// One instance covers one login attempt: the PKCE verifier and the
/// `state` value are generated once and must be the same for the URL the
/// user visits and for the code exchange.
#[derive(Debug)]
pub struct AuthorizationCodeFlow {
    client: OAuthClient,
    redirect_uri: String,
    pkce: Option<PkceChallenge>,
    state: String,
}

impl AuthorizationCodeFlow {
    /// Creates a new authorization code flow redirecting to `redirect_uri`.
    #[must_use]
    pub fn new(client: OAuthClient, redirect_uri: impl Into<String>) -> Self {
        Self {
            client,
            redirect_uri: redirect_uri.into(),
            pkce: None,
            state: random_state(),
        }
    }

    /// Enables PKCE for enhanced security (recommended for public clients).
    #[must_use]
    pub fn with_pkce(mut self) -> Self {
        self.pkce = Some(PkceChallenge::generate());
        self
    }

    /// Opaque value the authorization server echoes back in the redirect.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Redirect URI this flow was created with.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Builds the authorization URL for user consent.
    ///
    /// Uses the provider's default scopes unless `scopes` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be constructed.
    pub fn authorization_url(&self, scopes: Option<&[String]>) -> Result<Url> {
        let mut url = self.client.provider.auth_url.clone();

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.client.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri);

            let scope_str = scopes.map_or_else(
                || self.client.provider.default_scopes.join(" "),
                |s| s.join(" "),
            );
            if !scope_str.is_empty() {
                pairs.append_pair("scope", &scope_str);
            }

            pairs.append_pair("state", &self.state);

            if let Some(pkce) = &self.pkce {
                pairs
                    .append_pair("code_challenge", pkce.challenge())
                    .append_pair("code_challenge_method", pkce.method());
            }

            for (key, value) in &self.client.provider.auth_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Exchanges the authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token exchange fails.
    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        let code_verifier = self.pkce.as_ref().map(PkceChallenge::verifier);
        self.client
            .exchange_code(code, &self.redirect_uri, code_verifier)
            .await
    }

    /// Returns the PKCE verifier if PKCE is enabled.
    #[must_use]
    pub fn pkce_verifier(&self) -> Option<&str> {
        self.pkce.as_ref().map(PkceChallenge::verifier)
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn flow() -> AuthorizationCodeFlow {
        let provider = Provider::google().unwrap();
        let client = OAuthClient::new("test_client", provider);
        AuthorizationCodeFlow::new(client, "http://127.0.0.1:53682")
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_authorization_url() {
        let flow = flow();
        let url = flow.authorization_url(None).unwrap();

        assert_eq!(query(&url, "client_id").as_deref(), Some("test_client"));
        assert_eq!(query(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query(&url, "state").as_deref(), Some(flow.state()));
        assert_eq!(
            query(&url, "scope").as_deref(),
            Some("https://www.googleapis.com/auth/gmail.send")
        );
        // Check URL-encoded redirect_uri
        assert!(
            url.as_str()
                .contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A53682")
        );
        assert_eq!(query(&url, "access_type").as_deref(), Some("offline"));
        assert_eq!(query(&url, "prompt").as_deref(), Some("consent"));
    }

    #[test]
    fn test_authorization_url_with_pkce() {
        let flow = flow().with_pkce();
        let url = flow.authorization_url(None).unwrap();

        assert!(query(&url, "code_challenge").is_some());
        assert_eq!(query(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert!(flow.pkce_verifier().is_some());
    }

    #[test]
    fn test_authorization_url_custom_scopes() {
        let scopes = vec!["email".to_string(), "profile".to_string()];
        let url = flow().authorization_url(Some(&scopes)).unwrap();

        // Check URL-encoded scope (space becomes + in query parameters)
        assert!(url.as_str().contains("scope=email+profile"));
    }

    #[test]
    fn test_state_is_random() {
        assert_ne!(flow().state(), flow().state());
        assert!(flow().state().len() >= 16);
    }

    #[tokio::test]
    async fn test_exchange_sends_verifier_and_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("code_verifier="))
            .and(body_string_contains("redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt",
                "scope": "https://www.googleapis.com/auth/gmail.send"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Provider::new(
            "Test",
            format!("{}/auth", server.uri()),
            format!("{}/token", server.uri()),
        )
        .unwrap();
        let flow = AuthorizationCodeFlow::new(
            OAuthClient::new("cid", provider),
            "urn:ietf:wg:oauth:2.0:oob",
        )
        .with_pkce();

        let token = flow.exchange_code("abc").await.unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
    }
}
