//! # smog-core
//!
//! Relay engine for smog, an SMTP-to-Gmail gateway.
//!
//! Legacy clients (printers, scanners, monitoring tools) submit mail over
//! plain SMTP; each accepted message is sent through the Gmail API as the
//! account that authorized the relay.
//!
//! This crate provides:
//! - [`Config`]: the relay configuration file
//! - [`AccessPolicy`]: which client addresses may connect
//! - [`RelayBackend`] / [`RelaySession`]: authentication, envelope
//!   tracking and size enforcement for each SMTP connection
//! - [`Dispatcher`]: `To` rewriting, encoding, submission and failure
//!   classification
//! - [`GmailClient`]: the Gmail REST client with automatic token refresh
//! - [`CredentialManager`]: interactive login, token loading and
//!   revocation
//! - [`app`]: the server bootstrap used by `smog serve`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod config;
pub mod credential;
mod error;
pub mod policy;
pub mod relay;
pub mod session;

pub use config::{Config, DEFAULT_SMTP_PASSWORD, LogLevel};
pub use credential::CredentialManager;
pub use error::{Error, Result};
pub use policy::AccessPolicy;
pub use relay::{ApiError, Dispatcher, GmailClient, MailApi, RelayError, classify};
pub use session::{RelayBackend, RelaySession, SessionSettings};
