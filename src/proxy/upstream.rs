//! Opening connections to origin servers.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Something that can open a byte stream to `(host, port)`.
///
/// Production uses [`TcpUpstream`]; tests plug in in-memory origins.
pub trait Upstream: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, host: &str, port: u16)
    -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects to origins over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpUpstream;

impl Upstream for TcpUpstream {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}
