//! Per-connection relay state.
//!
//! [`RelayBackend`] decides whether a peer may connect and creates a
//! [`RelaySession`] for it. The session tracks authentication and the
//! current envelope, buffers the message under the size ceiling and hands
//! it to the [`Dispatcher`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use smog_smtp::{Backend, DataStream, Reply, ReplyCode, Session};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_SMTP_PASSWORD};
use crate::policy::AccessPolicy;
use crate::relay::{Dispatcher, MailApi, RelayError};

/// What every session on this server checks against.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Username clients authenticate with.
    pub username: String,
    /// Password clients authenticate with.
    pub password: String,
    /// Largest raw message accepted, in bytes. `0` means unlimited.
    pub raw_size_ceiling: u64,
}

impl SessionSettings {
    /// Creates settings.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>, raw_size_ceiling: u64) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            raw_size_ceiling,
        }
    }

    /// Takes the credentials and size ceiling from the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.smtp_user.clone(),
            config.smtp_password.clone(),
            config.raw_size_ceiling(),
        )
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("raw_size_ceiling", &self.raw_size_ceiling)
            .finish()
    }
}

fn invalid_credentials() -> Reply {
    Reply::new(ReplyCode::AUTH_FAILED, "5.7.8 invalid username or password")
}

/// Creates sessions for connections the access policy allows.
#[derive(Debug)]
pub struct RelayBackend<A> {
    settings: Arc<SessionSettings>,
    policy: AccessPolicy,
    dispatcher: Arc<Dispatcher<A>>,
}

impl<A: MailApi> RelayBackend<A> {
    /// Creates a backend.
    pub fn new(settings: SessionSettings, policy: AccessPolicy, api: A) -> Self {
        Self {
            settings: Arc::new(settings),
            policy,
            dispatcher: Arc::new(Dispatcher::new(api)),
        }
    }

    /// Creates a backend from the relay configuration.
    pub fn from_config(config: &Config, api: A) -> Self {
        Self::new(
            SessionSettings::from_config(config),
            AccessPolicy::new(&config.allowed_subnets),
            api,
        )
    }

    /// Returns the dispatcher shared by all sessions.
    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }
}

impl<A: MailApi> Backend for RelayBackend<A> {
    type Session = RelaySession<A>;

    fn new_session(&self, peer: SocketAddr) -> Result<Self::Session, Reply> {
        let client_ip = peer.ip();
        if !self.policy.is_allowed(client_ip) {
            warn!(client_ip = %client_ip, "rejecting connection from disallowed IP");
            return Err(Reply::new(
                ReplyCode::TRANSACTION_FAILED,
                "5.7.1 access denied",
            ));
        }

        debug!(client_ip = %client_ip, "accepted connection");
        Ok(RelaySession::new(
            client_ip,
            Arc::clone(&self.settings),
            Arc::clone(&self.dispatcher),
        ))
    }
}

/// State of one client connection.
#[derive(Debug)]
pub struct RelaySession<A> {
    client_ip: IpAddr,
    settings: Arc<SessionSettings>,
    dispatcher: Arc<Dispatcher<A>>,
    authenticated: bool,
    from: Option<String>,
    recipients: Vec<String>,
    buffer: Vec<u8>,
}

impl<A: MailApi> RelaySession<A> {
    /// Creates an unauthenticated session with no transaction.
    pub const fn new(
        client_ip: IpAddr,
        settings: Arc<SessionSettings>,
        dispatcher: Arc<Dispatcher<A>>,
    ) -> Self {
        Self {
            client_ip,
            settings,
            dispatcher,
            authenticated: false,
            from: None,
            recipients: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Address of the connected client.
    pub const fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// Returns true once the client has authenticated.
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Envelope sender of the current transaction.
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Envelope recipients of the current transaction, in RCPT order.
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Reads a message body and relays it.
    ///
    /// At most one byte more than the size ceiling is read; a message that
    /// reaches it is refused without contacting the mail API. Whatever the
    /// outcome, the transaction is over afterwards and the next one starts
    /// with `MAIL`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SizeExceeded`] for oversized messages,
    /// [`RelayError::Transient`] if the body cannot be read, and otherwise
    /// whatever the dispatcher reports.
    pub async fn receive<R>(&mut self, reader: &mut R) -> Result<String, RelayError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let outcome = self.read_and_dispatch(reader).await;
        self.clear_transaction();
        outcome
    }

    async fn read_and_dispatch<R>(&mut self, reader: &mut R) -> Result<String, RelayError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let ceiling = self.settings.raw_size_ceiling;
        let limit = if ceiling == 0 {
            u64::MAX
        } else {
            ceiling.saturating_add(1)
        };

        self.buffer.clear();
        reader
            .take(limit)
            .read_to_end(&mut self.buffer)
            .await
            .map_err(|e| {
                warn!(client_ip = %self.client_ip, error = %e, "error reading message data");
                RelayError::Transient(format!("error reading message data: {e}"))
            })?;

        let size = u64::try_from(self.buffer.len()).unwrap_or(u64::MAX);
        if ceiling > 0 && size > ceiling {
            warn!(
                client_ip = %self.client_ip,
                limit = ceiling,
                "message exceeds size limit"
            );
            return Err(RelayError::SizeExceeded { limit: ceiling });
        }

        let from = self.from.as_deref().unwrap_or_default();
        self.dispatcher
            .dispatch(self.client_ip, from, &self.recipients, &self.buffer)
            .await
    }

    fn clear_transaction(&mut self) {
        self.from = None;
        self.recipients.clear();
        self.buffer = Vec::new();
    }
}

impl<A: MailApi> Session for RelaySession<A> {
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), Reply> {
        if self.settings.password == DEFAULT_SMTP_PASSWORD {
            error!(
                client_ip = %self.client_ip,
                "refusing authentication while the SMTP password is the default"
            );
            return Err(invalid_credentials());
        }

        if username == self.settings.username && password == self.settings.password {
            self.authenticated = true;
            info!(client_ip = %self.client_ip, username, "client authenticated");
            return Ok(());
        }

        warn!(client_ip = %self.client_ip, username, "authentication failed");
        Err(invalid_credentials())
    }

    fn mail(&mut self, from: &str) -> Result<(), Reply> {
        if !self.authenticated {
            return Err(Reply::new(
                ReplyCode::AUTH_REQUIRED,
                "5.7.0 Authentication required",
            ));
        }

        self.clear_transaction();
        debug!(client_ip = %self.client_ip, from, "MAIL FROM");
        self.from = Some(from.to_string());
        Ok(())
    }

    fn rcpt(&mut self, to: &str) -> Result<(), Reply> {
        if self.from.is_none() {
            return Err(Reply::new(ReplyCode::BAD_SEQUENCE, "5.5.1 need MAIL command"));
        }

        debug!(client_ip = %self.client_ip, to, "RCPT TO");
        self.recipients.push(to.to_string());
        Ok(())
    }

    async fn data(&mut self, stream: &mut DataStream<'_>) -> Result<(), Reply> {
        self.receive(stream).await.map(drop).map_err(|e| e.to_reply())
    }

    fn reset(&mut self) {
        debug!(client_ip = %self.client_ip, "transaction reset");
        self.clear_transaction();
    }

    fn logout(&mut self) {
        debug!(client_ip = %self.client_ip, "session closed");
        self.clear_transaction();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::relay::ApiError;
    use smog_mime::encoding::decode_raw;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        sent: Mutex<Vec<String>>,
        fail_with: Option<ApiError>,
    }

    impl MailApi for RecordingApi {
        async fn send_raw(&self, raw: &str) -> Result<String, ApiError> {
            self.sent.lock().unwrap().push(raw.to_string());
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(format!("msg-{}", self.sent.lock().unwrap().len())),
            }
        }
    }

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    fn session_with(api: RecordingApi, ceiling: u64) -> RelaySession<RecordingApi> {
        RelaySession::new(
            CLIENT,
            Arc::new(SessionSettings::new("relay", "s3cret", ceiling)),
            Arc::new(Dispatcher::new(api)),
        )
    }

    fn session(ceiling: u64) -> RelaySession<RecordingApi> {
        session_with(RecordingApi::default(), ceiling)
    }

    fn sent(session: &RelaySession<RecordingApi>) -> Vec<String> {
        session.dispatcher.api().sent.lock().unwrap().clone()
    }

    fn start(session: &mut RelaySession<RecordingApi>, to: &[&str]) {
        session.authenticate("relay", "s3cret").unwrap();
        session.mail("app@example.com").unwrap();
        for rcpt in to {
            session.rcpt(rcpt).unwrap();
        }
    }

    #[test]
    fn test_authenticate() {
        let mut s = session(0);
        assert!(!s.is_authenticated());

        let err = s.authenticate("relay", "wrong").unwrap_err();
        assert_eq!(err.code, ReplyCode::AUTH_FAILED);
        let err = s.authenticate("Relay", "s3cret").unwrap_err();
        assert_eq!(err, invalid_credentials());
        assert!(!s.is_authenticated());

        s.authenticate("relay", "s3cret").unwrap();
        assert!(s.is_authenticated());
    }

    #[test]
    fn test_default_password_never_authenticates() {
        let mut s = RelaySession::new(
            CLIENT,
            Arc::new(SessionSettings::new("smog", DEFAULT_SMTP_PASSWORD, 0)),
            Arc::new(Dispatcher::new(RecordingApi::default())),
        );
        let err = s.authenticate("smog", DEFAULT_SMTP_PASSWORD).unwrap_err();
        assert_eq!(err.code, ReplyCode::AUTH_FAILED);
        assert!(!s.is_authenticated());
    }

    #[test]
    fn test_mail_requires_authentication() {
        let mut s = session(0);
        assert_eq!(s.mail("a@b.c").unwrap_err().code, ReplyCode::AUTH_REQUIRED);
        assert_eq!(s.rcpt("x@y.z").unwrap_err().code, ReplyCode::BAD_SEQUENCE);
    }

    #[test]
    fn test_mail_starts_a_new_transaction() {
        let mut s = session(0);
        start(&mut s, &["one@example.com", "two@example.com"]);
        assert_eq!(s.recipients().len(), 2);

        s.mail("other@example.com").unwrap();
        assert_eq!(s.from(), Some("other@example.com"));
        assert!(s.recipients().is_empty());
    }

    #[test]
    fn test_recipients_keep_order_and_duplicates() {
        let mut s = session(0);
        start(&mut s, &["b@x.org", "a@x.org", "b@x.org"]);
        assert_eq!(s.recipients(), ["b@x.org", "a@x.org", "b@x.org"]);
    }

    #[test]
    fn test_reset_keeps_authentication() {
        let mut s = session(0);
        start(&mut s, &["a@x.org"]);
        s.reset();
        assert!(s.is_authenticated());
        assert_eq!(s.from(), None);
        assert!(s.recipients().is_empty());
    }

    #[tokio::test]
    async fn test_receive_relays_with_rewritten_to() {
        let mut s = session(0);
        start(&mut s, &["a@x.org", "hidden@x.org"]);

        let mut body = &b"From: app@example.com\r\nTo: a@x.org\r\n\r\nhello\r\n"[..];
        let id = s.receive(&mut body).await.unwrap();
        assert_eq!(id, "msg-1");

        let sent = sent(&s);
        let decoded = String::from_utf8(decode_raw(&sent[0]).unwrap()).unwrap();
        assert_eq!(
            decoded,
            "From: app@example.com\r\nTo: a@x.org, hidden@x.org\r\n\r\nhello\r\n"
        );

        assert!(s.is_authenticated());
        assert_eq!(s.from(), None);
        assert!(s.recipients().is_empty());
    }

    #[tokio::test]
    async fn test_message_at_ceiling_is_relayed() {
        let message = b"Subject: x\r\n\r\n0123456789";
        let mut s = session(message.len() as u64);
        start(&mut s, &["a@x.org"]);

        s.receive(&mut &message[..]).await.unwrap();
        assert_eq!(sent(&s).len(), 1);
    }

    #[tokio::test]
    async fn test_message_over_ceiling_is_not_dispatched() {
        let message = b"Subject: x\r\n\r\n0123456789";
        let ceiling = message.len() as u64 - 1;
        let mut s = session(ceiling);
        start(&mut s, &["a@x.org"]);

        let err = s.receive(&mut &message[..]).await.unwrap_err();
        assert_eq!(err, RelayError::SizeExceeded { limit: ceiling });
        assert_eq!(err.to_reply().code, ReplyCode::EXCEEDED_STORAGE);
        assert!(sent(&s).is_empty());
        assert!(s.recipients().is_empty());
    }

    #[tokio::test]
    async fn test_zero_recipients_are_dispatched_without_to() {
        let mut s = session(0);
        start(&mut s, &[]);

        s.receive(&mut &b"To: a@x.org\r\nSubject: s\r\n\r\nbody"[..])
            .await
            .unwrap();
        let decoded = decode_raw(&sent(&s)[0]).unwrap();
        assert_eq!(decoded, b"Subject: s\r\n\r\nbody");
    }

    #[tokio::test]
    async fn test_dispatch_failure_ends_transaction() {
        let api = RecordingApi {
            fail_with: Some(ApiError::new(429, "quota")),
            ..RecordingApi::default()
        };
        let mut s = session_with(api, 0);
        start(&mut s, &["a@x.org"]);

        let err = s
            .receive(&mut &b"Subject: s\r\n\r\nbody"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::QuotaExceeded(_)));
        assert_eq!(err.to_reply().code, ReplyCode::INSUFFICIENT_STORAGE);
        assert_eq!(s.from(), None);
        assert!(s.is_authenticated());
    }

    #[test]
    fn test_backend_applies_policy() {
        let backend = RelayBackend::new(
            SessionSettings::new("relay", "s3cret", 0),
            AccessPolicy::new(&["10.0.0.0/8"]),
            RecordingApi::default(),
        );

        let allowed = backend
            .new_session("10.1.2.3:40000".parse().unwrap())
            .unwrap();
        assert_eq!(allowed.client_ip(), "10.1.2.3".parse::<IpAddr>().unwrap());
        assert!(!allowed.is_authenticated());

        let Err(reply) = backend.new_session("192.0.2.1:40000".parse().unwrap()) else {
            panic!("peer outside the allow-list was accepted");
        };
        assert_eq!(reply.code, ReplyCode::TRANSACTION_FAILED);
        assert_eq!(reply.message_text(), "5.7.1 access denied");
    }

    #[test]
    fn test_settings_debug_hides_password() {
        let settings = SessionSettings::new("relay", "s3cret", 10);
        let debug = format!("{settings:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("relay"));
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            smtp_user: "relay".to_string(),
            smtp_password: "s3cret".to_string(),
            message_size_limit_mb: 1,
            ..Config::default()
        };
        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings, SessionSettings::new("relay", "s3cret", 786_432));
    }
}
