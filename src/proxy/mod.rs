//! Per-connection proxy pipeline.
//!
//! Each accepted client connection is driven through a small state machine:
//!
//! ```text
//! ReadRequestLine ─┬─ not GET ──────────────────────────────────────▶ 501, done
//!                  └▶ CacheLookup ─┬─ hit ──────────────────────────▶ cached body, done
//!                                  └─ miss ▶ ReadHeaders ▶ ConnectOrigin ▶ ForwardRequest
//!                                            ▶ StreamResponse ▶ MaybeCache ▶ done
//! ```
//!
//! The cache is consulted before the client's headers are read, so a hit
//! never parses headers or touches an origin.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::http::{ErrorPage, HeaderReader, Headers, Method, RequestLine, StatusCode, Target};
use crate::io::Conn;

pub mod forward;
pub mod upstream;

pub use forward::{ObjectBuffer, REPLACED_HEADERS, build_request};
pub use upstream::{TcpUpstream, Upstream};

/// Errors that end a single proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("client I/O error: {0}")]
    Client(#[source] io::Error),

    #[error("I/O error talking to origin {host}:{port}: {source}")]
    Origin {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// How a connection's transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request was refused with a locally generated error page.
    Rejected(StatusCode),
    /// Served from the cache.
    Hit { bytes: usize },
    /// Relayed from the origin and stored.
    Cached { bytes: usize },
    /// Relayed from the origin but not stored.
    Uncached { bytes: usize },
    /// The origin could not be reached; nothing was sent to the client.
    OriginUnreachable,
    /// The client closed before sending a request line.
    Aborted,
}

/// What the client asked for, once its headers have been read.
#[derive(Debug)]
struct Exchange {
    line: RequestLine,
    target: Target,
    headers: Headers,
}

enum State<O> {
    ReadRequestLine,
    CacheLookup(RequestLine),
    ReadHeaders(RequestLine),
    ConnectOrigin(Exchange),
    ForwardRequest(Exchange, Conn<O>),
    StreamResponse(Exchange, Conn<O>),
    MaybeCache(Exchange, ObjectBuffer),
    Done(Outcome),
}

/// The caching proxy: shared cache, origin connector and relay settings.
///
/// One `Proxy` is shared (via `Arc`) by every connection task.
#[derive(Debug)]
pub struct Proxy<U = TcpUpstream> {
    cache: Arc<CacheStore>,
    upstream: U,
    chunk_size: usize,
    max_object_size: usize,
    user_agent: String,
}

impl Proxy<TcpUpstream> {
    /// Creates a proxy that reaches origins over TCP.
    pub fn new(cache: Arc<CacheStore>, config: &Config) -> Self {
        Self::with_upstream(cache, TcpUpstream, config)
    }
}

impl<U: Upstream> Proxy<U> {
    pub fn with_upstream(cache: Arc<CacheStore>, upstream: U, config: &Config) -> Self {
        Self {
            max_object_size: cache.limits().max_object_size,
            cache,
            upstream,
            chunk_size: config.chunk_size.max(1),
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Runs one client connection to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] when a socket read or write fails part-way. The
    /// connection is abandoned; nothing else is affected.
    pub async fn handle<S>(&self, stream: S) -> Result<Outcome, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut client = Conn::new(stream);
        let mut state = State::ReadRequestLine;

        let outcome = loop {
            state = match state {
                State::Done(outcome) => break outcome,
                state => self.step(&mut client, state).await?,
            };
        };

        // Best effort; the peer may already be gone.
        let _ = client.shutdown().await;
        Ok(outcome)
    }

    async fn step<S>(
        &self,
        client: &mut Conn<S>,
        state: State<U::Stream>,
    ) -> Result<State<U::Stream>, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match state {
            State::ReadRequestLine => {
                let Some(raw) = client.read_line().await.map_err(ProxyError::Client)? else {
                    return Ok(State::Done(Outcome::Aborted));
                };

                // The method decides 501 before the rest of the line is validated.
                if let Some(method) = RequestLine::method_token(&raw) {
                    if method != Method::Get {
                        let page = ErrorPage::new(StatusCode::NotImplemented, "Not implemented")
                            .detail("Proxy does not implement this method")
                            .cause(method.as_str());
                        return Ok(reject(client, page).await);
                    }
                }

                match RequestLine::parse(&raw) {
                    Ok(line) => Ok(State::CacheLookup(line)),
                    Err(e) => {
                        debug!(line = %raw, error = %e, "unparsable request line");
                        let page = ErrorPage::new(StatusCode::BadRequest, "Bad request")
                            .detail("Proxy could not parse the request line")
                            .cause(raw);
                        Ok(reject(client, page).await)
                    }
                }
            }

            State::CacheLookup(line) => match self.cache.lookup(line.target()).await {
                Some(hit) => {
                    debug!(url = line.target(), bytes = hit.size(), "cache hit");
                    client
                        .write_all(hit.body())
                        .await
                        .map_err(ProxyError::Client)?;
                    Ok(State::Done(Outcome::Hit { bytes: hit.size() }))
                }
                None => {
                    debug!(url = line.target(), "cache miss");
                    Ok(State::ReadHeaders(line))
                }
            },

            State::ReadHeaders(line) => {
                let mut reader = HeaderReader::new();
                while let Some(raw) = client.read_line().await.map_err(ProxyError::Client)? {
                    if reader.feed(&raw) {
                        break;
                    }
                }
                let headers = reader.into_headers();

                match Target::resolve(line.target(), &headers) {
                    Ok(target) => Ok(State::ConnectOrigin(Exchange {
                        line,
                        target,
                        headers,
                    })),
                    Err(e) => {
                        debug!(url = line.target(), error = %e, "unresolvable request target");
                        let page = ErrorPage::new(StatusCode::BadRequest, "Bad request")
                            .detail(e.to_string())
                            .cause(line.target());
                        Ok(reject(client, page).await)
                    }
                }
            }

            State::ConnectOrigin(exchange) => {
                let target = &exchange.target;
                match self
                    .upstream
                    .connect(target.connect_host(), target.port())
                    .await
                {
                    Ok(stream) => Ok(State::ForwardRequest(exchange, Conn::new(stream))),
                    Err(e) => {
                        warn!(
                            host = target.host(),
                            port = target.port(),
                            error = %e,
                            "origin connection failed"
                        );
                        Ok(State::Done(Outcome::OriginUnreachable))
                    }
                }
            }

            State::ForwardRequest(exchange, mut origin) => {
                let request = build_request(
                    &exchange.line,
                    &exchange.target,
                    &exchange.headers,
                    &self.user_agent,
                );
                origin
                    .write_all(&request)
                    .await
                    .map_err(|e| origin_error(&exchange.target, e))?;
                debug!(
                    url = exchange.line.target(),
                    host = exchange.target.host(),
                    path = exchange.target.path(),
                    bytes = request.len(),
                    "request forwarded"
                );
                Ok(State::StreamResponse(exchange, origin))
            }

            State::StreamResponse(exchange, mut origin) => {
                let mut object = ObjectBuffer::new(self.max_object_size);
                let mut chunk = vec![0u8; self.chunk_size];
                loop {
                    let n = origin
                        .read_chunk(&mut chunk)
                        .await
                        .map_err(|e| origin_error(&exchange.target, e))?;
                    if n == 0 {
                        break;
                    }
                    client
                        .write_all(&chunk[..n])
                        .await
                        .map_err(ProxyError::Client)?;
                    object.push(&chunk[..n]);
                }
                Ok(State::MaybeCache(exchange, object))
            }

            State::MaybeCache(exchange, object) => {
                let bytes = object.total();
                let url = exchange.line.target();
                let cached = match object.into_cacheable() {
                    Some(body) => self.cache.insert(url, body).await.is_inserted(),
                    None => {
                        debug!(url, bytes, "response too large to cache");
                        false
                    }
                };

                Ok(State::Done(if cached {
                    Outcome::Cached { bytes }
                } else {
                    Outcome::Uncached { bytes }
                }))
            }

            State::Done(outcome) => Ok(State::Done(outcome)),
        }
    }
}

/// Sends an error page and finishes the transaction. A failed write only
/// means the client is gone, so it is logged and otherwise ignored.
async fn reject<S, O>(client: &mut Conn<S>, page: ErrorPage) -> State<O>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let status = page.status();
    if let Err(e) = client.write_all(&page.into_bytes()).await {
        debug!(error = %e, status = status.as_u16(), "could not send error page");
    }
    State::Done(Outcome::Rejected(status))
}

fn origin_error(target: &Target, source: io::Error) -> ProxyError {
    ProxyError::Origin {
        host: target.host().to_owned(),
        port: target.port(),
        source,
    }
}
