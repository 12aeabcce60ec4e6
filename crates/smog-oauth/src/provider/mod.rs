//! `OAuth2` provider configurations.

use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::flow::OAuthClient;

/// Scope allowing messages to be sent, and nothing else.
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Authorization endpoint URL.
    pub auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Default scopes.
    pub default_scopes: Vec<String>,
    /// Extra query parameters for the authorization URL.
    pub auth_params: Vec<(String, String)>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            auth_url: Url::parse(auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            default_scopes: Vec::new(),
            auth_params: Vec::new(),
        })
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Adds a query parameter sent with every authorization request.
    #[must_use]
    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.push((key.into(), value.into()));
        self
    }

    /// Google `OAuth2` provider configuration.
    ///
    /// Requests offline access with forced consent so a refresh token is
    /// issued on every login, not only the first.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Self::google_with_endpoints(
            "https://accounts.google.com/o/oauth2/auth",
            "https://oauth2.googleapis.com/token",
        )
    }

    fn google_with_endpoints(auth_url: &str, token_url: &str) -> Result<Self> {
        Ok(Self::new("Google", auth_url, token_url)?
            .with_default_scopes(vec![GMAIL_SEND_SCOPE.to_string()])
            .with_auth_param("access_type", "offline")
            .with_auth_param("prompt", "consent"))
    }
}

/// Contents of a Google client secret file (`credentials.json`), as
/// downloaded from the Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorization endpoint.
    pub auth_uri: String,
    /// Token endpoint.
    pub token_uri: String,
    /// Registered redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Parses a client secret file's contents.
    ///
    /// Desktop (`installed`) and web (`web`) application files are both
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or holds neither key.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(json)?;
        let secret = file.installed.or(file.web).ok_or_else(|| {
            Error::InvalidConfig(
                "client secret file has neither an \"installed\" nor a \"web\" section".into(),
            )
        })?;
        if secret.client_id.is_empty() {
            return Err(Error::InvalidConfig("client_id is empty".into()));
        }
        Ok(secret)
    }

    /// Reads and parses a client secret file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "unable to read client secret file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Builds a Google provider using this file's endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints are not valid URLs.
    pub fn provider(&self) -> Result<Provider> {
        Provider::google_with_endpoints(&self.auth_uri, &self.token_uri)
    }

    /// Builds a client for this application.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints are not valid URLs.
    pub fn into_client(self) -> Result<OAuthClient> {
        let provider = self.provider()?;
        let client = OAuthClient::new(self.client_id, provider);
        Ok(match self.client_secret {
            Some(secret) => client.with_client_secret(secret),
            None => client,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    const INSTALLED: &str = r#"{
        "installed": {
            "client_id": "123.apps.googleusercontent.com",
            "project_id": "smog-test",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_secret": "shh",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    #[test]
    fn test_google_provider() {
        let provider = Provider::google().unwrap();
        assert_eq!(provider.name, "Google");
        assert_eq!(provider.default_scopes, vec![GMAIL_SEND_SCOPE.to_string()]);
        assert!(
            provider
                .auth_params
                .contains(&("access_type".to_string(), "offline".to_string()))
        );
    }

    #[test]
    fn test_custom_provider() {
        let provider = Provider::new(
            "Custom",
            "https://auth.example.com/authorize",
            "https://auth.example.com/token",
        )
        .unwrap()
        .with_default_scopes(vec!["email".to_string()]);

        assert_eq!(provider.name, "Custom");
        assert_eq!(provider.default_scopes.len(), 1);
        assert!(provider.auth_params.is_empty());
    }

    #[test]
    fn test_invalid_provider_url() {
        assert!(Provider::new("Bad", "not a url", "https://x.example/token").is_err());
    }

    #[test]
    fn test_client_secret_installed() {
        let secret = ClientSecret::from_json(INSTALLED).unwrap();
        assert_eq!(secret.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secret.client_secret.as_deref(), Some("shh"));

        let client = secret.into_client().unwrap();
        assert_eq!(client.client_id, "123.apps.googleusercontent.com");
        assert_eq!(
            client.provider.token_url.as_str(),
            "https://oauth2.googleapis.com/token"
        );
    }

    #[test]
    fn test_client_secret_web() {
        let json = r#"{"web": {"client_id": "w", "auth_uri": "https://a.example/auth", "token_uri": "https://a.example/token"}}"#;
        let secret = ClientSecret::from_json(json).unwrap();
        assert_eq!(secret.client_id, "w");
        assert!(secret.client_secret.is_none());
    }

    #[test]
    fn test_client_secret_errors() {
        assert!(ClientSecret::from_json("{}").is_err());
        assert!(ClientSecret::from_json("not json").is_err());
        assert!(ClientSecret::load(Path::new("/nonexistent/credentials.json")).is_err());
    }
}
