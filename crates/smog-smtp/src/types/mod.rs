//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{Address, ReversePath};
pub use extension::{AuthMechanism, Extension};
pub use reply::{Reply, ReplyCode};
