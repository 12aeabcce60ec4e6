//! Transport encodings for raw messages.
//!
//! Mail APIs that accept a "raw" RFC 5322 message expect it in the
//! URL-safe base64 alphabet (RFC 4648 section 5) without padding.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encodes a raw message as unpadded URL-safe base64.
#[must_use]
pub fn encode_raw(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes an unpadded URL-safe base64 message.
///
/// # Errors
///
/// Returns an error if the input is not valid for that alphabet.
pub fn decode_raw(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data).map_err(Into::into)
}

/// Size of `len` raw bytes once encoded by [`encode_raw`].
#[must_use]
pub const fn encoded_len(len: usize) -> usize {
    (len * 4).div_ceil(3)
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
    fn test_url_safe_alphabet_without_padding() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet
        assert_eq!(encode_raw(&[0xfb, 0xff]), "-_8");
        assert_eq!(encode_raw(b"a"), "YQ");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode_raw("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_raw("+/8=").is_err());
    }

    #[test]
    fn test_encoded_len() {
        for len in 0..64 {
            assert_eq!(encoded_len(len), encode_raw(&vec![0u8; len]).len());
        }
    }
}
