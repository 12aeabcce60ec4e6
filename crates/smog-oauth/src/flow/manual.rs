//! Headless flow: the operator pastes the code by hand.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};

/// Out-of-band redirect URI. The provider shows the code on a page instead
/// of redirecting anywhere.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Reads one line holding the authorization code.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if no line arrives in time and
/// [`Error::MissingCode`] on EOF or an empty line.
pub async fn read_code<R>(input: &mut R, timeout: Duration) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    tokio::time::timeout(timeout, input.read_line(&mut line))
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))??;

    let code = line.trim();
    if code.is_empty() {
        return Err(Error::MissingCode);
    }
    Ok(code.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_trimmed_code() {
        let mut input = BufReader::new(&b"  4/0AbCd-efg \r\nignored\n"[..]);
        let code = read_code(&mut input, Duration::from_secs(1)).await.unwrap();
        assert_eq!(code, "4/0AbCd-efg");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut input = BufReader::new(&b"\n"[..]);
        assert!(matches!(
            read_code(&mut input, Duration::from_secs(1)).await,
            Err(Error::MissingCode)
        ));

        let mut eof = BufReader::new(&b""[..]);
        assert!(matches!(
            read_code(&mut eof, Duration::from_secs(1)).await,
            Err(Error::MissingCode)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let (_writer, reader) = tokio::io::duplex(16);
        let mut input = BufReader::new(reader);
        assert!(matches!(
            read_code(&mut input, Duration::from_secs(300)).await,
            Err(Error::Timeout(300))
        ));
    }
}
