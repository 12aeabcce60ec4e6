//! Header block handling.

use crate::error::{Error, Result};

/// A single header field.
///
/// The original bytes (folded continuation lines and line endings
/// included) are kept so untouched fields are written back exactly as
/// they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    value: String,
    raw: Vec<u8>,
}

impl Field {
    /// Creates a new field, serialised as `Name: value\r\n`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let raw = format!("{name}: {value}\r\n").into_bytes();
        Self { name, value, raw }
    }

    /// Field name as written in the message.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unfolded value with surrounding whitespace trimmed.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Bytes the field occupies in the message.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered collection of header fields.
///
/// Lookups are case-insensitive; order and duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Field>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a header block.
    ///
    /// `block` must not contain the blank separator line. Lines may end in
    /// CRLF or a bare LF; a line starting with a space or tab continues the
    /// previous field.
    ///
    /// # Errors
    ///
    /// Returns an error if a line has no colon, the field name is empty
    /// or contains whitespace, or the block starts with a continuation.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let mut headers = Self::new();

        for (index, line) in block.split_inclusive(|&b| b == b'\n').enumerate() {
            let number = index + 1;

            if matches!(line.first(), Some(b' ' | b'\t')) {
                let Some(field) = headers.fields.last_mut() else {
                    return Err(Error::InvalidHeader {
                        line: number,
                        reason: "continuation line before any field".to_string(),
                    });
                };
                field.raw.extend_from_slice(line);
                let more = String::from_utf8_lossy(line);
                let more = more.trim();
                if !more.is_empty() {
                    if !field.value.is_empty() {
                        field.value.push(' ');
                    }
                    field.value.push_str(more);
                }
                continue;
            }

            let Some(colon) = line.iter().position(|&b| b == b':') else {
                return Err(Error::InvalidHeader {
                    line: number,
                    reason: "missing colon".to_string(),
                });
            };

            let name = &line[..colon];
            if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
                return Err(Error::InvalidHeader {
                    line: number,
                    reason: format!("invalid field name {:?}", String::from_utf8_lossy(name)),
                });
            }

            headers.fields.push(Field {
                name: String::from_utf8_lossy(name).into_owned(),
                value: String::from_utf8_lossy(&line[colon + 1..]).trim().to_string(),
                raw: line.to_vec(),
            });
        }

        // A final field without a line ending still needs one before the body
        if let Some(last) = headers.fields.last_mut()
            && !last.raw.ends_with(b"\n")
        {
            last.raw.extend_from_slice(b"\r\n");
        }

        Ok(headers)
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.is(name)).map(Field::value)
    }

    /// Gets all values for a header, in message order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is(name))
            .map(Field::value)
            .collect()
    }

    /// Appends a field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field::new(name, value));
    }

    /// Sets a header to a single value.
    ///
    /// The first existing occurrence is replaced in place and any further
    /// occurrences are dropped; if there is none the field is appended.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let field = Field::new(name, value);
        match self.fields.iter().position(|f| f.is(name)) {
            Some(first) => {
                self.fields[first] = field;
                let mut index = 0;
                self.fields.retain(|f| {
                    let keep = index <= first || !f.is(name);
                    index += 1;
                    keep
                });
            }
            None => self.fields.push(field),
        }
    }

    /// Removes all occurrences of a header.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| !f.is(name));
    }

    /// Returns an iterator over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.name(), f.value()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends the serialised header block (without the separator line).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            out.extend_from_slice(field.as_bytes());
        }
    }

    /// Returns the header block as text, replacing invalid UTF-8.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = Vec::new();
        self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com");
        headers.add("To", "alice@example.com");
        headers.add("Subject", "hi");
        headers.add("to", "bob@example.com");

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["From", "To", "Subject"]);
    }

    #[test]
    fn test_headers_set_appends_when_missing() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        headers.set("To", "x@example.com");
        assert_eq!(headers.to_text(), "Subject: Test\r\nTo: x@example.com\r\n");
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        headers.add("SUBJECT", "Again");
        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_parse_folded() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
        );

        let headers = Headers::parse(text.as_bytes()).unwrap();
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        // untouched fields are written back verbatim
        assert_eq!(headers.to_text(), text);
    }

    #[test]
    fn test_headers_parse_bare_lf_and_missing_newline() {
        let headers = Headers::parse(b"A: 1\nB: 2").unwrap();
        assert_eq!(headers.get("B"), Some("2"));
        assert_eq!(headers.to_text(), "A: 1\nB: 2\r\n");
    }

    #[test]
    fn test_headers_parse_errors() {
        assert!(matches!(
            Headers::parse(b"no colon here\r\n"),
            Err(Error::InvalidHeader { line: 1, .. })
        ));
        assert!(matches!(
            Headers::parse(b" leading continuation\r\n"),
            Err(Error::InvalidHeader { line: 1, .. })
        ));
        assert!(matches!(
            Headers::parse(b"Subject: ok\r\nBad Name: x\r\n"),
            Err(Error::InvalidHeader { line: 2, .. })
        ));
    }
}
