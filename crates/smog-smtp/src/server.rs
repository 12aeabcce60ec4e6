//! TCP listener with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Backend, Handler, SmtpStream};
use crate::error::Result;

/// Listener-level settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name used in the greeting and EHLO response.
    pub hostname: String,
    /// Largest message accepted on the wire, in bytes. `0` disables the
    /// limit and the SIZE advertisement.
    pub max_message_bytes: u64,
    /// Maximum recipients per transaction. `0` disables the limit.
    pub max_recipients: usize,
    /// How long to wait for each client line.
    pub read_timeout: Duration,
    /// How long a single reply may take to write.
    pub write_timeout: Duration,
    /// How long in-flight connections get to finish after shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            max_message_bytes: 0,
            max_recipients: 50,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// SMTP server that hands each connection to a session from `B`.
#[derive(Debug)]
pub struct Server<B> {
    backend: Arc<B>,
    config: Arc<ServerConfig>,
}

impl<B: Backend> Server<B> {
    /// Creates a server.
    #[must_use]
    pub fn new(backend: B, config: ServerConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// After cancellation the listener is closed and in-flight connections
    /// get [`ServerConfig::shutdown_grace`] to finish before they are
    /// aborted.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged and the
    /// loop keeps going.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "SMTP server listening");
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let _ = socket.set_nodelay(true);
                        let backend = Arc::clone(&self.backend);
                        let config = Arc::clone(&self.config);
                        connections.spawn(async move {
                            serve_connection(backend.as_ref(), &config, socket, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        info!(in_flight = connections.len(), "shutting down, no longer accepting connections");

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "connection task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "grace period expired, closing remaining connections"
            );
            connections.shutdown().await;
        }

        info!("SMTP server stopped");
        Ok(())
    }

    /// Runs the protocol on an already-accepted stream.
    ///
    /// Used by [`Server::serve`] for TCP connections; works with any
    /// transport, which is how the tests drive conversations.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        serve_connection(self.backend.as_ref(), &self.config, stream, peer).await;
    }
}

async fn serve_connection<B, S>(backend: &B, config: &ServerConfig, stream: S, peer: SocketAddr)
where
    B: Backend,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut stream = SmtpStream::new(stream, config.read_timeout, config.write_timeout);

    let session = match backend.new_session(peer) {
        Ok(session) => session,
        Err(reply) => {
            debug!(peer = %peer, "connection rejected");
            let _ = stream.write_reply(&reply).await;
            let _ = stream.shutdown().await;
            return;
        }
    };

    debug!(peer = %peer, "connection opened");
    match Handler::new(stream, session, config, peer).run().await {
        Ok(()) => debug!(peer = %peer, "connection closed"),
        Err(e) => debug!(peer = %peer, error = %e, "connection ended with error"),
    }
}
