//! SMTP reply types.

use std::fmt;

/// SMTP reply sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a single-line reply.
    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![text.into()],
        }
    }

    /// Creates a multi-line reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn multiline(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Serializes the reply in wire format.
    ///
    /// Continuation lines use `-` after the code, the last line a space:
    /// `250-first\r\n250 last\r\n`.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let last = self.message.len().saturating_sub(1);

        if self.message.is_empty() {
            buf.extend_from_slice(format!("{}\r\n", self.code).as_bytes());
            return buf;
        }

        for (i, line) in self.message.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            buf.extend_from_slice(format!("{}{sep}{line}\r\n", self.code).as_bytes());
        }
        buf
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message_text())
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Codes the server emits
impl ReplyCode {
    /// 214 Help message
    pub const HELP: Self = Self(214);
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 252 Cannot VRFY user, but will accept message
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 530 Authentication required
    pub const AUTH_REQUIRED: Self = Self(530);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn display() {
            assert_eq!(ReplyCode::CLOSING.to_string(), "221");
            assert_eq!(ReplyCode::new(599).as_u16(), 599);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn serialize_single_line() {
            let reply = Reply::new(ReplyCode::OK, "2.0.0 OK");
            assert_eq!(reply.serialize(), b"250 2.0.0 OK\r\n");
        }

        #[test]
        fn serialize_multi_line() {
            let reply = Reply::multiline(
                ReplyCode::OK,
                vec![
                    "relay.example.com".to_string(),
                    "8BITMIME".to_string(),
                    "AUTH PLAIN LOGIN".to_string(),
                ],
            );
            assert_eq!(
                reply.serialize(),
                b"250-relay.example.com\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n"
            );
        }

        #[test]
        fn serialize_empty_message() {
            let reply = Reply::multiline(ReplyCode::AUTH_CONTINUE, vec![]);
            assert_eq!(reply.serialize(), b"334\r\n");
        }

        #[test]
        fn display_joins_lines() {
            let reply = Reply::new(ReplyCode::LOCAL_ERROR, "try later");
            assert_eq!(reply.to_string(), "451 try later");
        }
    }
}
