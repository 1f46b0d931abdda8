//! Async TCP listener using Tokio.
//!
//! Accepts client connections and hands each to its own task running
//! [`Proxy::handle`]. Every connection lives or dies on its own while all of
//! them share one cache; the listener only joins them when it shuts down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::proxy::{Proxy, Upstream};

/// Errors produced by the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The proxy's listening socket.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use cacheproxy::{CacheStore, Config, Proxy, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let cache = Arc::new(CacheStore::with_limits(config.cache_limits()));
///     let proxy = Arc::new(Proxy::new(cache, &config));
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(proxy).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the listener to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning a handler task for each.
    ///
    /// Accept failures are logged and skipped; they never stop the loop.
    pub async fn run<U: Upstream>(self, proxy: Arc<Proxy<U>>) -> Result<(), ServerError> {
        self.run_until(proxy, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops accepting once `shutdown` resolves,
    /// then waits for every connection already being handled to finish before
    /// returning.
    pub async fn run_until<U, F>(
        self,
        proxy: Arc<Proxy<U>>,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        U: Upstream,
        F: Future<Output = ()>,
    {
        info!(address = %self.local_addr, "proxy listening");
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                // Reap finished handlers so the set does not grow without bound.
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join_error(joined);
                    continue;
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            connections.spawn(handle_connection(Arc::clone(&proxy), stream, peer_addr));
        }

        info!(
            address = %self.local_addr,
            in_flight = connections.len(),
            "proxy stopped accepting, draining connections"
        );
        while let Some(joined) = connections.join_next().await {
            log_join_error(joined);
        }
        info!(address = %self.local_addr, "all connections finished");
        Ok(())
    }
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "connection task failed");
    }
}

async fn handle_connection<U: Upstream>(
    proxy: Arc<Proxy<U>>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) {
    match proxy.handle(stream).await {
        Ok(outcome) => debug!(peer = %peer_addr, ?outcome, "connection finished"),
        Err(e) => warn!(peer = %peer_addr, error = %e, "connection closed with error"),
    }
}
