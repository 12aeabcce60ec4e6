//! Whole-message handling: header block, separator and body.

use crate::error::{Error, Result};
use crate::header::Headers;

/// An RFC 5322 message split into its header block and body.
///
/// The body is opaque and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    separator: Option<Vec<u8>>,
    body: Vec<u8>,
}

impl Message {
    /// Splits a raw message at the first empty line and parses the header
    /// block.
    ///
    /// A message without an empty line is all headers and has an empty
    /// body.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or the header block is
    /// malformed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::Empty);
        }

        let mut offset = 0;
        for line in raw.split_inclusive(|&b| b == b'\n') {
            if line == b"\r\n" || line == b"\n" {
                let headers = Headers::parse(&raw[..offset])?;
                return Ok(Self {
                    headers,
                    separator: Some(line.to_vec()),
                    body: raw[offset + line.len()..].to_vec(),
                });
            }
            offset += line.len();
        }

        Ok(Self {
            headers: Headers::parse(raw)?,
            separator: None,
            body: Vec::new(),
        })
    }

    /// Message body, exactly as received.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Gets the `To` header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.headers.get("to")
    }

    /// Gets the `Subject` header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Makes the `To` header carry exactly the given envelope recipients.
    ///
    /// Every existing `To` field is replaced by a single one listing
    /// `recipients` joined with `", "`, in the given order and without
    /// deduplication. With no recipients the header is removed.
    ///
    /// Recipients that were blind copies become visible to everyone who
    /// receives the message; APIs that only read the encoded message have
    /// no other way to learn about them.
    pub fn replace_recipients<S: AsRef<str>>(&mut self, recipients: &[S]) {
        if recipients.is_empty() {
            self.headers.remove("To");
            return;
        }
        let value = recipients
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ");
        self.headers.set("To", value);
    }

    /// Reassembles the message.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 1024);
        self.headers.write_to(&mut out);
        out.extend_from_slice(self.separator.as_deref().unwrap_or(b"\r\n"));
        out.extend_from_slice(&self.body);
        out
    }
}

/// Rewrites the `To` header of a raw message to list `recipients`.
///
/// See [`Message::replace_recipients`].
///
/// # Errors
///
/// Returns an error if the message cannot be parsed.
pub fn rewrite_recipients<S: AsRef<str>>(raw: &[u8], recipients: &[S]) -> Result<Vec<u8>> {
    let mut message = Message::parse(raw)?;
    message.replace_recipients(recipients);
    Ok(message.to_bytes())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SIMPLE: &[u8] = b"From: app@example.com\r\n\
To: someone@example.com\r\n\
Subject: Report\r\n\
\r\n\
Line one\r\n\
\r\n\
To: not-a-header@example.com\r\n";

    #[test]
    fn test_parse_splits_at_first_blank_line() {
        let message = Message::parse(SIMPLE).unwrap();
        assert_eq!(message.subject(), Some("Report"));
        assert_eq!(message.to(), Some("someone@example.com"));
        assert_eq!(
            message.body(),
            b"Line one\r\n\r\nTo: not-a-header@example.com\r\n"
        );
        assert_eq!(message.to_bytes(), SIMPLE);
    }

    #[test]
    fn test_replace_recipients() {
        let rewritten =
            rewrite_recipients(SIMPLE, &["a@example.com", "b@example.com"]).unwrap();
        let expected: &[u8] = b"From: app@example.com\r\n\
To: a@example.com, b@example.com\r\n\
Subject: Report\r\n\
\r\n\
Line one\r\n\
\r\n\
To: not-a-header@example.com\r\n";
        assert_eq!(rewritten, expected);
    }

    #[test]
    fn test_replace_adds_missing_to() {
        let rewritten = rewrite_recipients(b"Subject: x\r\n\r\nbody", &["a@example.com"]).unwrap();
        assert_eq!(rewritten, b"Subject: x\r\nTo: a@example.com\r\n\r\nbody");
    }

    #[test]
    fn test_replace_collapses_folded_and_duplicate_to() {
        let raw = b"To: one@example.com,\r\n two@example.com\r\nCc: c@example.com\r\nto: three@example.com\r\n\r\nhi";
        let rewritten = rewrite_recipients(raw, &["x@example.com"]).unwrap();
        assert_eq!(
            rewritten,
            b"To: x@example.com\r\nCc: c@example.com\r\n\r\nhi"
        );
    }

    #[test]
    fn test_no_recipients_removes_to() {
        let rewritten = rewrite_recipients::<&str>(SIMPLE, &[]).unwrap();
        let message = Message::parse(&rewritten).unwrap();
        assert!(message.to().is_none());
        assert_eq!(message.subject(), Some("Report"));
    }

    #[test]
    fn test_duplicates_preserved() {
        let rewritten =
            rewrite_recipients(SIMPLE, &["a@example.com", "a@example.com"]).unwrap();
        let message = Message::parse(&rewritten).unwrap();
        assert_eq!(message.to(), Some("a@example.com, a@example.com"));
    }

    #[test]
    fn test_headers_only_message() {
        let rewritten = rewrite_recipients(b"Subject: x", &["a@example.com"]).unwrap();
        assert_eq!(rewritten, b"Subject: x\r\nTo: a@example.com\r\n\r\n");
    }

    #[test]
    fn test_unparsable_messages() {
        assert!(matches!(Message::parse(b""), Err(Error::Empty)));
        assert!(Message::parse(b"this is not a header\r\n\r\nbody").is_err());
    }

    fn address() -> impl Strategy<Value = String> {
        "[a-z]{1,8}@[a-z]{1,8}\\.(com|org|net)"
    }

    proptest! {
        #[test]
        fn prop_to_matches_envelope(
            recipients in prop::collection::vec(address(), 1..6),
            original_to in "[ -~]{0,40}",
            body in prop::collection::vec(any::<u8>(), 0..200),
        ) {
            let mut raw = format!("Subject: t\r\nTo: {original_to}\r\n\r\n").into_bytes();
            raw.extend_from_slice(&body);

            let rewritten = rewrite_recipients(&raw, &recipients).unwrap();
            let message = Message::parse(&rewritten).unwrap();
            let expected = recipients.join(", ");

            prop_assert_eq!(message.headers.get_all("To"), vec![expected.as_str()]);
            prop_assert_eq!(message.body(), &body[..]);
        }
    }
}
