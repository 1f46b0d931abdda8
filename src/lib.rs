//! # cacheproxy
//!
//! A concurrent HTTP forward proxy that caches response bodies in memory.
//!
//! Clients send `GET` requests with absolute URLs; the proxy answers repeat
//! requests straight from a shared, byte-bounded cache and relays everything
//! else from the origin over short-lived `HTTP/1.0` connections.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cacheproxy::{CacheStore, Config, Proxy, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let cache = Arc::new(CacheStore::with_limits(config.cache_limits()));
//!     let proxy = Arc::new(Proxy::new(cache, &config));
//!
//!     Server::bind(config.bind_addr()).await?.run(proxy).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod io;
pub mod proxy;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStats, CacheStore, InsertOutcome};
pub use config::{Config, ConfigError};
pub use proxy::{Outcome, Proxy, ProxyError};
pub use server::{Server, ServerError};
