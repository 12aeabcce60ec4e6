//! SMTP commands received from clients.

use crate::error::Result;
use crate::parser;
use crate::types::{Address, AuthMechanism, ReversePath};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS (not offered by this server)
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender path
        from: ReversePath,
        /// BODY parameter (7BIT, 8BITMIME)
        body: Option<String>,
        /// SIZE parameter
        size: Option<u64>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address to verify
        address: String,
    },
    /// HELP
    Help,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// A verb this server does not know.
    Unknown(String),
}

impl Command {
    /// Parses a command line (without the trailing CRLF).
    ///
    /// Unknown verbs parse successfully as [`Command::Unknown`] so the
    /// caller can answer with 500; malformed arguments of known verbs are
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments of a known command are malformed.
    pub fn parse(line: &str) -> Result<Self> {
        parser::parse_command(line)
    }

    /// Returns the command verb, as used in logs.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy { .. } => "VRFY",
            Self::Help => "HELP",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ehlo_command() {
        let cmd = Command::parse("EHLO client.example.com").unwrap();
        assert_eq!(
            cmd,
            Command::Ehlo {
                hostname: "client.example.com".to_string()
            }
        );
        assert_eq!(cmd.verb(), "EHLO");
    }

    #[test]
    fn test_auth_plain_with_initial_response() {
        let cmd = Command::parse("AUTH PLAIN AHVzZXIAcGFzcw==").unwrap();
        assert_eq!(
            cmd,
            Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
            }
        );
    }

    #[test]
    fn test_mail_from_with_params() {
        let cmd = Command::parse("MAIL FROM:<sender@example.com> BODY=8BITMIME SIZE=12345").unwrap();
        assert_eq!(
            cmd,
            Command::MailFrom {
                from: ReversePath::Address(Address::new("sender@example.com").unwrap()),
                body: Some("8BITMIME".to_string()),
                size: Some(12345),
            }
        );
    }

    #[test]
    fn test_rcpt_to_command() {
        let cmd = Command::parse("rcpt to:<recipient@example.com>").unwrap();
        assert_eq!(
            cmd,
            Command::RcptTo {
                to: Address::new("recipient@example.com").unwrap()
            }
        );
    }

    #[test]
    fn test_simple_verbs() {
        assert_eq!(Command::parse("DATA").unwrap(), Command::Data);
        assert_eq!(Command::parse("rset").unwrap(), Command::Rset);
        assert_eq!(Command::parse("NOOP anything").unwrap(), Command::Noop);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
        assert_eq!(Command::parse("STARTTLS").unwrap(), Command::StartTls);
    }

    #[test]
    fn test_unknown_verb() {
        assert_eq!(
            Command::parse("TURN").unwrap(),
            Command::Unknown("TURN".to_string())
        );
    }
}
