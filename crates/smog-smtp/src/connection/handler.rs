//! Per-connection protocol loop.

use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{Session, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::server::ServerConfig;
use crate::types::{AuthMechanism, Extension, Reply, ReplyCode, ReversePath};

enum Flow {
    Continue,
    Quit,
}

/// Drives one client connection from greeting to QUIT.
pub(crate) struct Handler<'a, S, H> {
    stream: SmtpStream<S>,
    session: H,
    config: &'a ServerConfig,
    peer: SocketAddr,
    greeted: bool,
    authenticated: bool,
    in_transaction: bool,
    recipients: usize,
}

impl<'a, S, H> Handler<'a, S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Session,
{
    pub(crate) const fn new(
        stream: SmtpStream<S>,
        session: H,
        config: &'a ServerConfig,
        peer: SocketAddr,
    ) -> Self {
        Self {
            stream,
            session,
            config,
            peer,
            greeted: false,
            authenticated: false,
            in_transaction: false,
            recipients: 0,
        }
    }

    /// Runs the conversation. The session's `logout` is always called.
    pub(crate) async fn run(mut self) -> Result<()> {
        let result = self.conversation().await;
        self.session.logout();
        let _ = self.stream.shutdown().await;
        result
    }

    async fn conversation(&mut self) -> Result<()> {
        let greeting = format!("{} ESMTP smog ready", self.config.hostname);
        self.reply(ReplyCode::SERVICE_READY, &greeting).await?;

        loop {
            let line = match self.stream.read_line().await {
                Ok(line) => line,
                Err(Error::LineTooLong(max)) => {
                    let text = format!("5.5.2 line too long (max {max} bytes)");
                    self.reply(ReplyCode::SYNTAX_ERROR, &text).await?;
                    continue;
                }
                Err(Error::Timeout) => {
                    debug!(peer = %self.peer, "client idle, closing");
                    // best effort, the client may already be gone
                    let _ = self
                        .reply(ReplyCode::SERVICE_UNAVAILABLE, "4.4.2 idle timeout, closing connection")
                        .await;
                    return Ok(());
                }
                Err(Error::ConnectionClosed) => {
                    debug!(peer = %self.peer, "client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "malformed command");
                    self.reply(ReplyCode::PARAMETER_ERROR, &format!("5.5.4 {e}"))
                        .await?;
                    continue;
                }
            };

            debug!(peer = %self.peer, verb = command.verb(), "command");
            if matches!(self.handle(command).await?, Flow::Quit) {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Helo { hostname } => {
                self.greet();
                self.reply(ReplyCode::OK, &format!("{} greets {hostname}", self.config.hostname))
                    .await?;
            }
            Command::Ehlo { hostname } => {
                self.greet();
                let reply = self.ehlo_reply(&hostname);
                self.stream.write_reply(&reply).await?;
            }
            Command::StartTls => {
                self.reply(ReplyCode::NOT_IMPLEMENTED, "5.5.1 STARTTLS not available")
                    .await?;
            }
            Command::Auth {
                mechanism,
                initial_response,
            } => self.auth(mechanism, initial_response).await?,
            Command::MailFrom { from, size, .. } => self.mail(&from, size).await?,
            Command::RcptTo { to } => {
                if !self.in_transaction {
                    self.reply(ReplyCode::BAD_SEQUENCE, "5.5.1 need MAIL before RCPT")
                        .await?;
                } else if self.config.max_recipients > 0
                    && self.recipients >= self.config.max_recipients
                {
                    self.reply(ReplyCode::INSUFFICIENT_STORAGE, "4.5.3 too many recipients")
                        .await?;
                } else {
                    match self.session.rcpt(to.as_str()) {
                        Ok(()) => {
                            self.recipients += 1;
                            self.reply(ReplyCode::OK, "2.1.5 OK").await?;
                        }
                        Err(reply) => self.stream.write_reply(&reply).await?,
                    }
                }
            }
            Command::Data => self.data().await?,
            Command::Rset => {
                self.end_transaction();
                self.session.reset();
                self.reply(ReplyCode::OK, "2.0.0 OK").await?;
            }
            Command::Vrfy { .. } => {
                self.reply(
                    ReplyCode::CANNOT_VERIFY,
                    "2.5.2 cannot VRFY user, but will accept message",
                )
                .await?;
            }
            Command::Help => {
                self.reply(ReplyCode::HELP, "2.0.0 see RFC 5321").await?;
            }
            Command::Noop => self.reply(ReplyCode::OK, "2.0.0 OK").await?,
            Command::Quit => {
                self.reply(ReplyCode::CLOSING, "2.0.0 bye").await?;
                return Ok(Flow::Quit);
            }
            Command::Unknown(verb) => {
                debug!(peer = %self.peer, verb = %verb, "unknown command");
                self.reply(ReplyCode::NOT_IMPLEMENTED, "5.5.2 command not recognized")
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    fn greet(&mut self) {
        self.greeted = true;
        if self.in_transaction {
            self.end_transaction();
            self.session.reset();
        }
    }

    fn ehlo_reply(&self, client: &str) -> Reply {
        let mut extensions = Vec::new();
        if self.config.max_message_bytes > 0 {
            extensions.push(Extension::Size(Some(self.config.max_message_bytes)));
        }
        extensions.push(Extension::EightBitMime);
        extensions.push(Extension::EnhancedStatusCodes);
        extensions.push(Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]));

        let mut lines = vec![format!("{} greets {client}", self.config.hostname)];
        lines.extend(extensions.iter().map(ToString::to_string));
        Reply::multiline(ReplyCode::OK, lines)
    }

    async fn auth(&mut self, mechanism: AuthMechanism, initial: Option<String>) -> Result<()> {
        if !self.greeted {
            return self.reply(ReplyCode::BAD_SEQUENCE, "5.5.1 send EHLO first").await;
        }
        if self.authenticated {
            return self.reply(ReplyCode::BAD_SEQUENCE, "5.5.1 already authenticated").await;
        }
        if self.in_transaction {
            return self
                .reply(ReplyCode::BAD_SEQUENCE, "5.5.1 AUTH not allowed during a transaction")
                .await;
        }

        let credentials = match mechanism {
            AuthMechanism::Plain => self.auth_plain(initial).await?,
            AuthMechanism::Login => self.auth_login(initial).await?,
        };
        let Some((username, password)) = credentials else {
            return Ok(());
        };

        match self.session.authenticate(&username, &password) {
            Ok(()) => {
                self.authenticated = true;
                self.reply(ReplyCode::AUTH_SUCCEEDED, "2.7.0 authentication successful")
                    .await
            }
            Err(reply) => {
                warn!(peer = %self.peer, username = %username, "authentication failed");
                self.stream.write_reply(&reply).await
            }
        }
    }

    /// RFC 4616: `authzid NUL authcid NUL passwd`.
    async fn auth_plain(&mut self, initial: Option<String>) -> Result<Option<(String, String)>> {
        let response = match initial {
            // "=" is an explicitly empty initial response
            Some(response) if response != "=" => response,
            _ => {
                let Some(response) = self.challenge("").await? else {
                    return Ok(None);
                };
                response
            }
        };

        let Some(decoded) = self.decode(&response).await? else {
            return Ok(None);
        };

        let mut parts = decoded.split('\0');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_authzid), Some(user), Some(pass), None) => {
                Ok(Some((user.to_string(), pass.to_string())))
            }
            _ => {
                self.reply(ReplyCode::PARAMETER_ERROR, "5.5.2 malformed PLAIN response")
                    .await?;
                Ok(None)
            }
        }
    }

    async fn auth_login(&mut self, initial: Option<String>) -> Result<Option<(String, String)>> {
        let encoded_user = match initial {
            Some(response) => response,
            None => {
                let Some(response) = self.challenge("Username:").await? else {
                    return Ok(None);
                };
                response
            }
        };
        let Some(username) = self.decode(&encoded_user).await? else {
            return Ok(None);
        };

        let Some(encoded_pass) = self.challenge("Password:").await? else {
            return Ok(None);
        };
        let Some(password) = self.decode(&encoded_pass).await? else {
            return Ok(None);
        };

        Ok(Some((username, password)))
    }

    /// Sends a 334 challenge and reads the client's answer.
    ///
    /// Returns `None` when the client cancels with `*`.
    async fn challenge(&mut self, prompt: &str) -> Result<Option<String>> {
        let text = if prompt.is_empty() {
            Reply::multiline(ReplyCode::AUTH_CONTINUE, vec![])
        } else {
            Reply::new(ReplyCode::AUTH_CONTINUE, STANDARD.encode(prompt))
        };
        self.stream.write_reply(&text).await?;

        let line = self.stream.read_line().await?;
        if line.trim() == "*" {
            self.reply(ReplyCode::PARAMETER_ERROR, "5.0.0 authentication cancelled")
                .await?;
            return Ok(None);
        }
        Ok(Some(line))
    }

    async fn decode(&mut self, encoded: &str) -> Result<Option<String>> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if decoded.is_none() {
            self.reply(ReplyCode::PARAMETER_ERROR, "5.5.2 invalid base64 in AUTH response")
                .await?;
        }
        Ok(decoded)
    }

    async fn mail(&mut self, from: &ReversePath, size: Option<u64>) -> Result<()> {
        if !self.authenticated {
            return self.reply(ReplyCode::AUTH_REQUIRED, "5.7.0 authentication required").await;
        }
        if self.in_transaction {
            return self.reply(ReplyCode::BAD_SEQUENCE, "5.5.1 nested MAIL command").await;
        }
        let max = self.config.max_message_bytes;
        if let Some(size) = size
            && max > 0
            && size > max
        {
            return self
                .reply(ReplyCode::EXCEEDED_STORAGE, "5.3.4 message size exceeds fixed limit")
                .await;
        }

        match self.session.mail(from.as_str()) {
            Ok(()) => {
                self.in_transaction = true;
                self.recipients = 0;
                self.reply(ReplyCode::OK, "2.1.0 OK").await
            }
            Err(reply) => self.stream.write_reply(&reply).await,
        }
    }

    async fn data(&mut self) -> Result<()> {
        if !self.in_transaction {
            return self.reply(ReplyCode::BAD_SEQUENCE, "5.5.1 need MAIL before DATA").await;
        }
        if self.recipients == 0 {
            return self
                .reply(ReplyCode::TRANSACTION_FAILED, "5.5.1 no valid recipients")
                .await;
        }

        self.reply(ReplyCode::START_DATA, "end data with <CR><LF>.<CR><LF>")
            .await?;

        let outcome = {
            let mut body = self.stream.data_stream();
            let outcome = self.session.data(&mut body).await;
            body.drain().await?;
            outcome
        };
        self.end_transaction();

        match outcome {
            Ok(()) => self.reply(ReplyCode::OK, "2.0.0 OK: message relayed").await,
            Err(reply) => self.stream.write_reply(&reply).await,
        }
    }

    const fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.recipients = 0;
    }

    async fn reply(&mut self, code: ReplyCode, text: &str) -> Result<()> {
        self.stream.write_reply(&Reply::new(code, text)).await
    }
}
