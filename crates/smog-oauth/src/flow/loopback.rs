//! Local redirect receiver for the interactive browser flow.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Port the redirect listener binds by default. It has to be stable
/// because some consoles want the exact redirect URI registered.
pub const DEFAULT_LOOPBACK_PORT: u16 = 53682;

/// How long one browser connection may take to send its request line.
/// Browsers open speculative connections that never send anything.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_REQUEST_LINE: u64 = 8192;

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication successful</h1>\
<p>You can close this window and return to the terminal.</p></body></html>";

enum Redirect {
    Code(String),
    Failed(Error),
    Ignored,
}

/// HTTP listener on 127.0.0.1 that waits for the authorization redirect.
///
/// The socket is closed when the listener is dropped, which
/// [`LoopbackListener::wait_for_code`] does on every return path.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackListener {
    /// Binds `127.0.0.1:port`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is unavailable.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        let port = listener.local_addr()?.port();
        debug!(port, "redirect listener started");
        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{port}"),
        })
    }

    /// Redirect URI to register in the authorization request.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Waits for the browser to be redirected back with a code.
    ///
    /// Requests for other paths (favicons and the like) are answered with
    /// 404 and ignored. The first request to `/` decides the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time,
    /// [`Error::AccessDenied`] if the user declined,
    /// [`Error::StateMismatch`] if `state` does not match and
    /// [`Error::MissingCode`] if the redirect carries no code.
    pub async fn wait_for_code(self, state: &str, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.accept_redirect(state))
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))?
    }

    async fn accept_redirect(&self, state: &str) -> Result<String> {
        loop {
            let (mut socket, peer) = self.listener.accept().await?;
            debug!(peer = %peer, "redirect connection");

            match tokio::time::timeout(REQUEST_TIMEOUT, handle_request(&mut socket, state)).await {
                Ok(Ok(Redirect::Code(code))) => return Ok(code),
                Ok(Ok(Redirect::Failed(e))) => return Err(e),
                Ok(Ok(Redirect::Ignored)) => {}
                Ok(Err(e)) => debug!(error = %e, "bad redirect request"),
                Err(_) => debug!(peer = %peer, "redirect connection sent nothing"),
            }
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        debug!(redirect_uri = %self.redirect_uri, "redirect listener closed");
    }
}

async fn handle_request(socket: &mut TcpStream, state: &str) -> Result<Redirect> {
    let Some(target) = read_request_target(socket).await? else {
        respond(socket, "400 Bad Request", "<html><body>Bad request</body></html>").await;
        return Ok(Redirect::Ignored);
    };

    let url = Url::parse("http://127.0.0.1/")?.join(&target)?;
    if url.path() != "/" {
        respond(socket, "404 Not Found", "<html><body>Not found</body></html>").await;
        return Ok(Redirect::Ignored);
    }

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        warn!(error = %error, "authorization was not granted");
        respond(socket, "200 OK", &failure_page("Authorization was denied.")).await;
        return Ok(Redirect::Failed(Error::AccessDenied(error)));
    }

    if param("state").as_deref() != Some(state) {
        respond(socket, "400 Bad Request", &failure_page("State mismatch.")).await;
        return Ok(Redirect::Failed(Error::StateMismatch));
    }

    let Some(code) = param("code").filter(|c| !c.is_empty()) else {
        respond(
            socket,
            "400 Bad Request",
            &failure_page("Authorization code not found in request."),
        )
        .await;
        return Ok(Redirect::Failed(Error::MissingCode));
    };

    respond(socket, "200 OK", SUCCESS_PAGE).await;
    info!("authorization code received");
    Ok(Redirect::Code(code))
}

/// Reads the request line and headers, returning the target of a GET.
async fn read_request_target(socket: &mut TcpStream) -> Result<Option<String>> {
    let mut reader = BufReader::new(socket);

    let mut request_line = String::new();
    (&mut reader)
        .take(MAX_REQUEST_LINE)
        .read_line(&mut request_line)
        .await?;

    loop {
        let mut header = String::new();
        let n = (&mut reader)
            .take(MAX_REQUEST_LINE)
            .read_line(&mut header)
            .await?;
        if n == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    Ok(match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Some(target.to_string()),
        _ => None,
    })
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = socket.write_all(response.as_bytes()).await {
        debug!(error = %e, "failed to answer browser");
    }
    let _ = socket.shutdown().await;
}

fn failure_page(reason: &str) -> String {
    format!(
        "<html><body><h1>Authentication failed</h1><p>{reason}</p>\
<p>Return to the terminal for details.</p></body></html>"
    )
}

/// Opens `url` in the user's default browser.
///
/// # Errors
///
/// Returns [`Error::Browser`] if no browser could be launched, which is the
/// cue to fall back to the manual flow.
pub fn open_browser(url: &str) -> Result<()> {
    opener::open_browser(url).map_err(|e| Error::Browser(e.to_string()))
}
