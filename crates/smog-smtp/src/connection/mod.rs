//! Server-side connection handling.
//!
//! The protocol loop owns the wire: greeting, command parsing, AUTH
//! exchanges, envelope sequencing and DATA framing. Everything with
//! relay semantics is delegated to a [`Session`] created per connection by
//! a [`Backend`].

mod data;
mod handler;
mod stream;

use std::future::Future;
use std::net::SocketAddr;

pub use data::DataStream;
pub(crate) use handler::Handler;
pub use stream::{MAX_LINE_LENGTH, SmtpStream};

use crate::types::Reply;

/// Factory for per-connection sessions.
pub trait Backend: Send + Sync + 'static {
    /// Session type handed to the protocol loop.
    type Session: Session;

    /// Called for every accepted connection before the greeting is sent.
    ///
    /// Returning `Err` rejects the connection: the reply is written in place
    /// of the greeting and the connection is closed.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the peer is not welcome.
    fn new_session(&self, peer: SocketAddr) -> Result<Self::Session, Reply>;
}

/// Callbacks driven by the protocol loop for one connection.
///
/// The loop only calls `mail` after a successful `authenticate`, `rcpt`
/// after `mail`, and `data` after at least one accepted `rcpt`. A
/// returned `Err` is written to the client verbatim.
pub trait Session: Send {
    /// Checks the credentials presented through AUTH PLAIN or AUTH LOGIN.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when authentication fails.
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), Reply>;

    /// Starts a transaction with the given reverse path (empty for `<>`).
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the sender is refused.
    fn mail(&mut self, from: &str) -> Result<(), Reply>;

    /// Adds a recipient to the current transaction.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the recipient is refused.
    fn rcpt(&mut self, to: &str) -> Result<(), Reply>;

    /// Consumes the message body and completes the transaction.
    ///
    /// The stream need not be read to the end; the loop drains whatever is
    /// left before replying.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the message is not accepted.
    fn data(&mut self, stream: &mut DataStream<'_>) -> impl Future<Output = Result<(), Reply>> + Send;

    /// Abandons the current transaction (RSET, EHLO).
    fn reset(&mut self);

    /// Called once when the connection ends, however it ends.
    fn logout(&mut self);
}
