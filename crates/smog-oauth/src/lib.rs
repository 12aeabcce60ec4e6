//! # smog-oauth
//!
//! `OAuth2` credential handling for the smog relay.
//!
//! ## Features
//!
//! - **Client secrets**: reads Google `credentials.json` files
//! - **Authorization Code Flow** with PKCE and `state` verification
//! - **Two ways back**: a loopback listener for the browser redirect, or a
//!   pasted code for headless machines
//! - **Token management**: refresh, expiry checks, and a [`TokenStore`]
//!   with owner-only permissions, a single backup and zero-fill revocation
//!
//! ## Quick Start
//!
//! ```ignore
//! use smog_oauth::{AuthorizationCodeFlow, ClientSecret, LoopbackListener, TokenStore};
//!
//! let client = ClientSecret::load("credentials.json".as_ref())?.into_client()?;
//! let listener = LoopbackListener::bind(smog_oauth::DEFAULT_LOOPBACK_PORT).await?;
//! let flow = AuthorizationCodeFlow::new(client, listener.redirect_uri()).with_pkce();
//!
//! let url = flow.authorization_url(None)?;
//! smog_oauth::open_browser(url.as_str())?;
//! let code = listener.wait_for_code(flow.state(), Duration::from_secs(300)).await?;
//!
//! let token = flow.exchange_code(&code).await?;
//! TokenStore::new("token.json").save(&token)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod token;

pub use error::{Error, Result};
pub use flow::{
    AuthorizationCodeFlow, DEFAULT_LOOPBACK_PORT, LoopbackListener, OAuthClient, PkceChallenge,
    TOKEN_REQUEST_TIMEOUT, open_browser,
};
pub use provider::{ClientSecret, GMAIL_SEND_SCOPE, Provider};
pub use token::{Token, TokenStore};
