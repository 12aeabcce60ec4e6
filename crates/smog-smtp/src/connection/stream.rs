//! Line-oriented SMTP stream handling.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::DataStream;
use crate::error::{Error, Result};
use crate::types::Reply;

/// Maximum length of a command line, including CRLF.
///
/// RFC 5321 requires at least 512; AUTH PLAIN responses with long
/// passwords need more.
pub const MAX_LINE_LENGTH: usize = 4096;

/// SMTP stream over any async transport (TCP in production, an in-memory
/// duplex in tests).
#[derive(Debug)]
pub struct SmtpStream<S> {
    inner: BufReader<S>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a transport with the given per-line timeouts.
    pub fn new(stream: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(stream),
            read_timeout,
            write_timeout,
        }
    }

    /// Reads one command line, without the trailing CRLF.
    ///
    /// Non-UTF-8 bytes are replaced rather than rejected; command verbs and
    /// paths are ASCII anyway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] on EOF, [`Error::Timeout`] if the
    /// client stays silent past the read timeout and
    /// [`Error::LineTooLong`] if no newline arrives within
    /// [`MAX_LINE_LENGTH`] bytes (the rest of that line is discarded).
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let limit = MAX_LINE_LENGTH as u64;

        let read = tokio::time::timeout(
            self.read_timeout,
            (&mut self.inner).take(limit).read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        if read == 0 {
            return Err(Error::ConnectionClosed);
        }

        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE_LENGTH {
                self.discard_line().await?;
                return Err(Error::LineTooLong(MAX_LINE_LENGTH));
            }
            // EOF in the middle of a line
            return Err(Error::ConnectionClosed);
        }

        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn discard_line(&mut self) -> Result<()> {
        loop {
            let available = tokio::time::timeout(self.read_timeout, self.inner.fill_buf())
                .await
                .map_err(|_| Error::Timeout)??;
            if available.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                self.inner.consume(pos + 1);
                return Ok(());
            }
            let len = available.len();
            self.inner.consume(len);
        }
    }

    /// Writes a reply and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or exceeds the write timeout.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<()> {
        let data = reply.serialize();
        let writer = self.inner.get_mut();
        tokio::time::timeout(self.write_timeout, async {
            writer.write_all(&data).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    /// Returns a reader over the message body that follows a `354` reply.
    pub fn data_stream(&mut self) -> DataStream<'_> {
        DataStream::new(&mut self.inner, self.read_timeout)
    }

    /// Shuts down the write half of the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.get_mut().shutdown().await?;
        Ok(())
    }
}
