//! Server bootstrap.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::credential::CredentialManager;
use crate::error::{Error, Result};
use crate::relay::{GmailClient, MailApi};
use crate::session::RelayBackend;

/// Validates the configuration, loads the Google token and relays mail
/// until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration is unsafe, no usable token is
/// stored, the client secret cannot be read or the listener cannot bind.
pub async fn run(config: &Config) -> Result<()> {
    config.validate()?;

    let credentials = CredentialManager::from_config(config);
    let token = credentials.load()?;
    let gmail = GmailClient::new(credentials.client()?, token)?;
    info!("configuration and credentials validated successfully");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    serve(config, gmail, shutdown).await
}

/// Binds the configured address and relays through `api` until
/// `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn serve<A: MailApi>(config: &Config, api: A, shutdown: CancellationToken) -> Result<()> {
    let address = format!("{}:{}", config.listen_address, config.smtp_port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::Config(format!("unable to listen on {address}: {e}")))?;
    serve_on(listener, config, api, shutdown).await
}

/// Relays through `api` on an already bound listener.
///
/// # Errors
///
/// Returns an error if the SMTP server fails.
pub async fn serve_on<A: MailApi>(
    listener: TcpListener,
    config: &Config,
    api: A,
    shutdown: CancellationToken,
) -> Result<()> {
    if config.allowed_subnets.is_empty() {
        warn!("AllowedSubnets is empty; any client that knows the password can relay");
    } else {
        info!(allowed = ?config.allowed_subnets, "client access restricted");
    }

    let server = smog_smtp::Server::new(
        RelayBackend::from_config(config, api),
        config.server_config(),
    );
    server.serve(listener, shutdown).await?;

    info!("server stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "unable to listen for SIGTERM");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
