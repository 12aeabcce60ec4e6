//! # smog-mime
//!
//! Raw RFC 5322 message handling for the smog relay.
//!
//! The relay never interprets message bodies. It only needs to parse the
//! header block far enough to rewrite the `To` field, put the message back
//! together with its body untouched, and encode the result the way mail
//! APIs expect raw messages.
//!
//! ```ignore
//! use smog_mime::{encoding::encode_raw, rewrite_recipients};
//!
//! let rewritten = rewrite_recipients(raw, &["a@example.com", "b@example.com"])?;
//! let payload = encode_raw(&rewritten);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;
mod message;

pub mod encoding;

pub use error::{Error, Result};
pub use header::{Field, Headers};
pub use message::{Message, rewrite_recipients};
