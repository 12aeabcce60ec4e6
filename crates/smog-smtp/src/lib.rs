//! # smog-smtp
//!
//! Server side of SMTP (RFC 5321) for a submission-only relay.
//!
//! The crate owns the wire protocol and nothing else: it greets, parses
//! commands, runs AUTH PLAIN/LOGIN exchanges, enforces command ordering,
//! frames the DATA phase and writes replies. What happens to a message is
//! up to the [`Session`] implementation a [`Backend`] creates for each
//! connection.
//!
//! ## Quick Start
//!
//! ```ignore
//! use smog_smtp::{Backend, Server, ServerConfig};
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = Server::new(MyBackend, ServerConfig::default());
//! let listener = TcpListener::bind("0.0.0.0:2525").await?;
//! server.serve(listener, CancellationToken::new()).await?;
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Commands received from clients
//! - [`connection`]: Session callbacks, line framing and the DATA reader
//! - [`parser`]: Command line parser
//! - [`server`]: Listener and shutdown handling
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod server;
pub mod types;

pub use command::Command;
pub use connection::{Backend, DataStream, Session};
pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode, ReversePath};
