//! Message body reader for the DATA phase.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Partial lines longer than this are passed through without waiting for
/// the newline. The terminator is three bytes, so no decision is lost.
const MAX_BUFFERED_LINE: usize = 8192;

/// Reader over a message body sent after `354`.
///
/// Yields the body with dot-stuffing removed and line endings normalised to
/// CRLF, then reports EOF once the lone `.` terminator line is seen. The
/// terminator itself is never yielded.
///
/// Every read that waits on the client is bounded by the connection's read
/// timeout; expiry surfaces as [`io::ErrorKind::TimedOut`].
pub struct DataStream<'a> {
    reader: &'a mut (dyn AsyncBufRead + Send + Unpin),
    timeout: Duration,
    idle: Pin<Box<Sleep>>,
    line: Vec<u8>,
    pending: Vec<u8>,
    pos: usize,
    at_line_start: bool,
    finished: bool,
}

impl std::fmt::Debug for DataStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("finished", &self.finished)
            .field("buffered", &(self.pending.len() - self.pos))
            .finish_non_exhaustive()
    }
}

impl<'a> DataStream<'a> {
    /// Creates a body reader over the connection's buffered reader.
    pub fn new(reader: &'a mut (dyn AsyncBufRead + Send + Unpin), timeout: Duration) -> Self {
        Self {
            reader,
            timeout,
            idle: Box::pin(tokio::time::sleep(timeout)),
            line: Vec::new(),
            pending: Vec::new(),
            pos: 0,
            at_line_start: true,
            finished: false,
        }
    }

    /// Returns true once the terminator line has been consumed.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Discards whatever is left of the body up to and including the
    /// terminator, so the connection is positioned at the next command.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or times out first.
    pub async fn drain(&mut self) -> io::Result<u64> {
        tokio::io::copy(self, &mut tokio::io::sink()).await
    }

    fn flush_line(&mut self, complete: bool) {
        let mut line = std::mem::take(&mut self.line);

        if self.at_line_start && complete && (line == b".\r\n" || line == b".\n") {
            self.finished = true;
            return;
        }

        if self.at_line_start && line.first() == Some(&b'.') {
            line.remove(0);
        }

        if complete && !line.ends_with(b"\r\n") {
            // bare LF
            line.pop();
            line.extend_from_slice(b"\r\n");
        }

        self.pending = line;
        self.pos = 0;
        self.at_line_start = complete;
    }
}

impl AsyncRead for DataStream<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        loop {
            if this.pos < this.pending.len() {
                let n = (this.pending.len() - this.pos).min(buf.remaining());
                buf.put_slice(&this.pending[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }

            if this.finished {
                return Poll::Ready(Ok(()));
            }

            let available = match Pin::new(&mut *this.reader).poll_fill_buf(cx) {
                Poll::Ready(result) => result?,
                Poll::Pending => {
                    ready!(this.idle.as_mut().poll(cx));
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for message data",
                    )));
                }
            };

            if available.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of data",
                )));
            }

            let (len, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            this.line.extend_from_slice(&available[..len]);
            Pin::new(&mut *this.reader).consume(len);

            let deadline = Instant::now() + this.timeout;
            this.idle.as_mut().reset(deadline);

            if complete || this.line.len() >= MAX_BUFFERED_LINE {
                this.flush_line(complete);
            }
        }
    }
}
