//! End-to-end relay tests.
//!
//! Each test runs the relay on a loopback port and talks SMTP to it, with
//! a recording mail API standing in for Gmail.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use smog_core::{ApiError, Config, MailApi, app};
use smog_mime::encoding::decode_raw;

#[derive(Clone, Default)]
struct RecordingApi {
    sent: Arc<Mutex<Vec<String>>>,
    fail_with: Option<ApiError>,
}

impl RecordingApi {
    fn failing(err: ApiError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| String::from_utf8(decode_raw(raw).unwrap()).unwrap())
            .collect()
    }
}

impl MailApi for RecordingApi {
    async fn send_raw(&self, raw: &str) -> Result<String, ApiError> {
        self.sent.lock().unwrap().push(raw.to_string());
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok("18c2f0a9d1".to_string()),
        }
    }
}

struct Relay {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<smog_core::Result<()>>,
}

impl Relay {
    async fn start(config: Config, api: RecordingApi) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle =
            tokio::spawn(async move { app::serve_on(listener, &config, api, token).await });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn connect(&self) -> Client {
        Client {
            reader: BufReader::new(TcpStream::connect(self.addr).await.unwrap()),
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn config() -> Config {
    Config {
        smtp_user: "relay".to_string(),
        smtp_password: "s3cret".to_string(),
        message_size_limit_mb: 1,
        shutdown_grace_period: 1,
        ..Config::default()
    }
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    async fn send(&mut self, line: &str) {
        self.reader
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "relay closed the connection, got {lines:?}");
            let line = line.trim_end().to_string();
            let last = line.len() <= 3 || line.as_bytes()[3] == b' ';
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    async fn code(&mut self) -> u16 {
        self.reply().await[0][..3].parse().unwrap()
    }

    async fn command(&mut self, line: &str) -> u16 {
        self.send(line).await;
        self.code().await
    }

    async fn login(&mut self) {
        assert_eq!(self.code().await, 220);
        self.send("EHLO printer.lan").await;
        self.reply().await;
        // "\0relay\0s3cret"
        assert_eq!(self.command("AUTH PLAIN AHJlbGF5AHMzY3JldA==").await, 235);
    }

    /// Sends a transaction and returns the final reply.
    async fn transaction(&mut self, to: &[&str], body: &[u8]) -> Vec<String> {
        assert_eq!(self.command("MAIL FROM:<scanner@office.lan>").await, 250);
        for rcpt in to {
            assert_eq!(self.command(&format!("RCPT TO:<{rcpt}>")).await, 250);
        }
        assert_eq!(self.command("DATA").await, 354);
        let stream = self.reader.get_mut();
        stream.write_all(body).await.unwrap();
        stream.write_all(b".\r\n").await.unwrap();
        self.reply().await
    }
}

const MESSAGE: &[u8] = b"From: scanner@office.lan\r\n\
To: frontdesk@example.com\r\n\
Subject: Scan complete\r\n\
\r\n\
Your document is attached.\r\n\
..leading dot\r\n";

fn large_body(size: usize) -> Vec<u8> {
    let mut body = b"Subject: big\r\n\r\n".to_vec();
    let line = [b'x'; 998];
    while body.len() < size {
        body.extend_from_slice(&line);
        body.extend_from_slice(b"\r\n");
    }
    body
}

#[tokio::test]
async fn test_message_is_relayed_to_all_envelope_recipients() {
    let api = RecordingApi::default();
    let relay = Relay::start(config(), api.clone()).await;
    let mut client = relay.connect().await;

    client.login().await;
    let reply = client
        .transaction(&["frontdesk@example.com", "archive@example.com"], MESSAGE)
        .await;
    assert!(reply[0].starts_with("250"), "{reply:?}");
    assert_eq!(client.command("QUIT").await, 221);

    assert_eq!(
        api.messages(),
        vec![
            "From: scanner@office.lan\r\n\
To: frontdesk@example.com, archive@example.com\r\n\
Subject: Scan complete\r\n\
\r\n\
Your document is attached.\r\n\
.leading dot\r\n"
                .to_string()
        ]
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_ehlo_advertises_raw_ceiling() {
    let relay = Relay::start(config(), RecordingApi::default()).await;
    let mut client = relay.connect().await;

    assert_eq!(client.code().await, 220);
    client.send("EHLO printer.lan").await;
    let lines = client.reply().await;
    assert!(lines.iter().any(|l| l == "250-SIZE 786432"), "{lines:?}");
    assert!(lines.iter().any(|l| l.ends_with("AUTH PLAIN LOGIN")), "{lines:?}");

    relay.stop().await;
}

#[tokio::test]
async fn test_oversized_message_is_refused_without_dispatch() {
    let api = RecordingApi::default();
    let relay = Relay::start(config(), api.clone()).await;
    let mut client = relay.connect().await;

    client.login().await;
    // Under the configured 1 MiB but over the 3/4 raw ceiling.
    let reply = client
        .transaction(&["frontdesk@example.com"], &large_body(900 * 1024))
        .await;
    assert!(reply[0].starts_with("552"), "{reply:?}");
    assert!(api.messages().is_empty());

    // The connection stays usable and authenticated.
    let reply = client
        .transaction(&["frontdesk@example.com"], &large_body(700 * 1024))
        .await;
    assert!(reply[0].starts_with("250"), "{reply:?}");
    assert_eq!(api.messages().len(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_quota_failure_is_temporary() {
    let api = RecordingApi::failing(ApiError::new(
        429,
        "User-rate limit exceeded; reason: rateLimitExceeded",
    ));
    let relay = Relay::start(config(), api.clone()).await;
    let mut client = relay.connect().await;

    client.login().await;
    let reply = client.transaction(&["frontdesk@example.com"], MESSAGE).await;
    assert_eq!(
        reply,
        vec!["452 4.3.1 Service temporarily unavailable due to quota limits"]
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_revoked_credential_asks_for_login() {
    let api = RecordingApi::failing(ApiError::new(401, "Request had invalid authentication credentials"));
    let relay = Relay::start(config(), api).await;
    let mut client = relay.connect().await;

    client.login().await;
    let reply = client.transaction(&["frontdesk@example.com"], MESSAGE).await;
    assert_eq!(
        reply,
        vec!["535 5.7.0 Authentication required - please run 'smog auth login'"]
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_other_failures_are_generic() {
    let api = RecordingApi::failing(ApiError::new(503, "Backend Error"));
    let relay = Relay::start(config(), api).await;
    let mut client = relay.connect().await;

    client.login().await;
    let reply = client.transaction(&["frontdesk@example.com"], MESSAGE).await;
    assert_eq!(reply, vec!["451 4.3.0 Temporary failure relaying message"]);

    relay.stop().await;
}

#[tokio::test]
async fn test_wrong_password_can_be_retried() {
    let api = RecordingApi::default();
    let relay = Relay::start(config(), api.clone()).await;
    let mut client = relay.connect().await;

    assert_eq!(client.code().await, 220);
    client.send("EHLO printer.lan").await;
    client.reply().await;
    // "\0relay\0guess"
    assert_eq!(client.command("AUTH PLAIN AHJlbGF5AGd1ZXNz").await, 535);
    assert_eq!(client.command("MAIL FROM:<scanner@office.lan>").await, 530);
    assert!(api.messages().is_empty());

    // Same connection, right password this time.
    assert_eq!(client.command("AUTH PLAIN AHJlbGF5AHMzY3JldA==").await, 235);
    let reply = client.transaction(&["frontdesk@example.com"], MESSAGE).await;
    assert!(reply[0].starts_with("250"), "{reply:?}");
    assert_eq!(api.messages().len(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_disallowed_client_is_refused_before_greeting() {
    let config = Config {
        allowed_subnets: vec!["10.0.0.0/8".to_string()],
        ..config()
    };
    let relay = Relay::start(config, RecordingApi::default()).await;
    let mut client = relay.connect().await;

    assert_eq!(client.reply().await, vec!["554 5.7.1 access denied"]);
    let mut rest = Vec::new();
    client.reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    relay.stop().await;
}

#[tokio::test]
async fn test_allowed_client_is_greeted() {
    let config = Config {
        allowed_subnets: vec!["127.0.0.0/8".to_string()],
        ..config()
    };
    let relay = Relay::start(config, RecordingApi::default()).await;
    let mut client = relay.connect().await;

    assert_eq!(client.code().await, 220);
    assert_eq!(client.command("QUIT").await, 221);

    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_connections_after_grace_period() {
    let relay = Relay::start(config(), RecordingApi::default()).await;
    let mut client = relay.connect().await;
    client.login().await;

    relay.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), relay.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut rest = Vec::new();
    client.reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
