//! Google credential lifecycle.
//!
//! `auth login` obtains a token interactively and stores it, `serve`
//! loads it, `auth revoke` erases it. Two acquisition flows exist:
//!
//! - **Browser**: a listener on 127.0.0.1 receives the redirect after the
//!   operator approves access in the browser opened for them.
//! - **Manual**: for headless machines. The operator opens the printed URL
//!   anywhere and pastes the code back into the terminal.
//!
//! The manual flow only runs when the browser flow cannot: the listener
//! cannot bind, no browser can be launched, or nobody completes the
//! redirect in time.

use std::path::PathBuf;
use std::time::Duration;

use smog_oauth::flow::manual::{self, OOB_REDIRECT_URI};
use smog_oauth::{
    AuthorizationCodeFlow, ClientSecret, DEFAULT_LOOPBACK_PORT, LoopbackListener, OAuthClient,
    Token, TokenStore,
};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// How long each acquisition flow waits for the operator.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Opens an authorization URL for the operator.
pub type BrowserLauncher = fn(&str) -> smog_oauth::Result<()>;

/// Loads, acquires and revokes the token the relay sends mail with.
#[derive(Debug, Clone)]
pub struct CredentialManager {
    credentials_path: PathBuf,
    store: TokenStore,
    loopback_port: u16,
    timeout: Duration,
    launcher: BrowserLauncher,
}

impl CredentialManager {
    /// Creates a manager for the given client secret and token files.
    pub fn new(credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            store: TokenStore::new(token_path),
            loopback_port: DEFAULT_LOOPBACK_PORT,
            timeout: LOGIN_TIMEOUT,
            launcher: smog_oauth::open_browser,
        }
    }

    /// Creates a manager for the configured paths.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.credentials_path(), config.token_path())
    }

    /// Port for the browser flow's redirect listener. `0` picks one.
    #[must_use]
    pub const fn with_loopback_port(mut self, port: u16) -> Self {
        self.loopback_port = port;
        self
    }

    /// How long each flow waits for the operator.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the function used to open the authorization URL.
    #[must_use]
    pub fn with_browser_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// The on-disk token store.
    #[must_use]
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Builds an OAuth client from the client secret file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not configured or the file cannot
    /// be read or parsed.
    pub fn client(&self) -> Result<OAuthClient> {
        if self.credentials_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "GoogleCredentialsPath is not set".to_string(),
            ));
        }
        Ok(ClientSecret::load(&self.credentials_path)?.into_client()?)
    }

    /// Loads the stored token for serving.
    ///
    /// An expired token is fine as long as it can be refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialMissing`] when no token is stored,
    /// [`Error::CredentialExpired`] when it can no longer be refreshed and
    /// an OAuth error when the file is corrupt.
    pub fn load(&self) -> Result<Token> {
        let path = self.store.path().to_path_buf();
        let Some(token) = self.store.load()? else {
            return Err(Error::CredentialMissing(path));
        };

        if !token.is_usable() {
            return Err(Error::CredentialExpired(path));
        }

        info!(
            path = %path.display(),
            expires_at = ?token.expires_at,
            "Google API token loaded"
        );
        Ok(token)
    }

    /// Runs the interactive login, reading a pasted code from stdin if the
    /// manual flow is needed.
    ///
    /// # Errors
    ///
    /// See [`CredentialManager::login_with_input`].
    pub async fn login(&self, force: bool) -> Result<Token> {
        let mut stdin = BufReader::new(tokio::io::stdin());
        self.login_with_input(force, &mut stdin).await
    }

    /// Obtains a token and stores it.
    ///
    /// Unless `force` is set, a stored token that is still usable is kept
    /// and returned without contacting anyone. An unreadable stored token
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the client secret cannot be loaded, the
    /// operator denies access, the code exchange fails, both flows time
    /// out or the token cannot be saved.
    pub async fn login_with_input<R>(&self, force: bool, input: &mut R) -> Result<Token>
    where
        R: AsyncBufRead + Unpin,
    {
        if !force {
            match self.store.load() {
                Ok(Some(token)) if token.is_usable() => {
                    info!(
                        path = %self.store.path().display(),
                        "a usable token is already stored; use --force to replace it"
                    );
                    return Ok(token);
                }
                Ok(Some(_)) => info!("stored token has expired and cannot be refreshed"),
                Ok(None) => info!("no stored token found"),
                Err(e) => warn!(error = %e, "stored token is unreadable and will be replaced"),
            }
        }

        let client = self.client()?;
        let token = match self.browser_flow(client.clone()).await {
            Ok(token) => token,
            Err(e) if can_fall_back(&e) => {
                warn!(error = %e, "browser authorization unavailable, falling back to manual mode");
                self.manual_flow(client, input).await?
            }
            Err(e) => return Err(e.into()),
        };

        if token.refresh_token.is_none() {
            warn!("no refresh token was issued; the relay will need a new login when this token expires");
        }

        self.store.save(&token)?;
        info!(path = %self.store.path().display(), "token saved");
        Ok(token)
    }

    /// Erases the stored token and its backup.
    ///
    /// Returns `false` if there was nothing to erase.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be removed.
    pub fn revoke(&self) -> Result<bool> {
        let removed = self.store.revoke()?;
        if removed {
            info!(path = %self.store.path().display(), "stored token removed");
        } else {
            info!(path = %self.store.path().display(), "no stored token to remove");
        }
        Ok(removed)
    }

    async fn browser_flow(&self, client: OAuthClient) -> smog_oauth::Result<Token> {
        let listener = LoopbackListener::bind(self.loopback_port).await?;
        let flow = AuthorizationCodeFlow::new(client, listener.redirect_uri()).with_pkce();
        let url = flow.authorization_url(None)?;

        info!(url = %url, "opening browser for authorization");
        (self.launcher)(url.as_str())?;
        info!("waiting for authorization in the browser; if it does not open, visit the URL above");

        let code = listener.wait_for_code(flow.state(), self.timeout).await?;
        flow.exchange_code(&code).await
    }

    async fn manual_flow<R>(&self, client: OAuthClient, input: &mut R) -> smog_oauth::Result<Token>
    where
        R: AsyncBufRead + Unpin,
    {
        let flow = AuthorizationCodeFlow::new(client, OOB_REDIRECT_URI).with_pkce();
        let url = flow.authorization_url(None)?;

        println!("Open the following URL in a browser and approve access:\n\n{url}\n");
        println!("Then paste the authorization code here and press Enter:");
        info!(url = %url, "waiting for the authorization code to be pasted");

        let code = manual::read_code(input, self.timeout).await?;
        flow.exchange_code(&code).await
    }
}

fn can_fall_back(err: &smog_oauth::Error) -> bool {
    matches!(
        err,
        smog_oauth::Error::Io(_) | smog_oauth::Error::Browser(_) | smog_oauth::Error::Timeout(_)
    )
}
