//! Line framing over an async byte stream.
//!
//! Inbound lines end in `\r\n` or a bare `\n`; both are accepted and the
//! terminator is stripped. Outbound lines always end in `\r\n`.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read side of a transport, boxed so any stream can back a connection.
pub type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
/// Write side of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line_len: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_line_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(512),
            max_line_len,
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Lines longer than the configured maximum are dropped without being
    /// buffered in full. Invalid UTF-8 is replaced rather than rejected.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        // Room for the longest accepted line plus "\r\n".
        let limit = self.max_line_len as u64 + 2;
        loop {
            self.buf.clear();
            let n = (&mut self.inner).take(limit).read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }

            if n as u64 == limit && self.buf.last() != Some(&b'\n') {
                let len = n + self.discard_line().await?;
                tracing::warn!(len, max = self.max_line_len, "Line too long, dropping");
                continue;
            }

            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
            }

            if self.buf.len() > self.max_line_len {
                tracing::warn!(len = self.buf.len(), max = self.max_line_len, "Line too long, dropping");
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
        }
    }

    /// Skip the rest of the current line. Returns the bytes skipped.
    async fn discard_line(&mut self) -> io::Result<usize> {
        let mut skipped = 0;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    self.inner.consume(i + 1);
                    return Ok(skipped + i + 1);
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one line, appending CRLF if the caller left it off, and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
