//! SMTP extension types.

use std::fmt;

/// Extensions the server advertises in its EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size (`None` advertises no fixed limit)
    Size(Option<u64>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// ENHANCEDSTATUSCODES - RFC 2034 status codes in replies
    EnhancedStatusCodes,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(mechanisms) => {
                write!(f, "AUTH")?;
                for mechanism in mechanisms {
                    write!(f, " {}", mechanism.as_str())?;
                }
                Ok(())
            }
            Self::Size(Some(size)) => write!(f, "SIZE {size}"),
            Self::Size(None) => write!(f, "SIZE"),
            Self::EightBitMime => write!(f, "8BITMIME"),
            Self::Pipelining => write!(f, "PIPELINING"),
            Self::EnhancedStatusCodes => write!(f, "ENHANCEDSTATUSCODES"),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication (RFC 4616)
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn display_auth() {
        let ext = Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]);
        assert_eq!(ext.to_string(), "AUTH PLAIN LOGIN");
    }

    #[test]
    fn display_size() {
        assert_eq!(Extension::Size(Some(7_864_320)).to_string(), "SIZE 7864320");
        assert_eq!(Extension::Size(None).to_string(), "SIZE");
    }

    #[test]
    fn display_flags() {
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(Extension::Pipelining.to_string(), "PIPELINING");
        assert_eq!(
            Extension::EnhancedStatusCodes.to_string(),
            "ENHANCEDSTATUSCODES"
        );
    }

    #[test]
    fn parse_mechanisms() {
        assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::parse("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::parse("CRAM-MD5"), None);
        assert_eq!(AuthMechanism::Login.as_str(), "LOGIN");
    }
}
