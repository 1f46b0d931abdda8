//! Buffered socket I/O for one side of a proxied exchange.
//!
//! [`Conn`] wraps any bidirectional byte stream (a `TcpStream` in production,
//! an in-memory duplex pipe in tests) with the three primitives the handler
//! needs: read one line, read a fixed-size chunk, write an exact buffer.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest request or header line we will buffer.
pub const MAX_LINE: usize = 8192;

/// A buffered, bidirectional connection.
#[derive(Debug)]
pub struct Conn<S> {
    inner: BufReader<S>,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Reads one line and returns it without its CR/LF terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A line longer than [`MAX_LINE`] is
    /// returned truncated; the remainder is read as the next line. Invalid
    /// UTF-8 is replaced rather than rejected.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::with_capacity(128);
        let n = (&mut self.inner)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut raw)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        while matches!(raw.last(), Some(b'\n' | b'\r')) {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Fills `buf` from the stream, stopping early only at end of stream.
    ///
    /// Returns the number of bytes read; `0` means the peer is done.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Writes the whole buffer and flushes it, or fails.
    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    /// Shuts down the write half, signalling end of stream to the peer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.get_mut().shutdown().await
    }
}
