//! Request-line and header parsing using the [`httparse`] crate.
//!
//! The proxy reads a client request one line at a time: the request line is
//! parsed first so the cache can be consulted before anything else is read,
//! and header lines are only fed to a [`HeaderReader`] on a cache miss.

use thiserror::Error;
use tracing::debug;

use super::{Headers, Method, Version};

/// Errors that can occur while parsing a client request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unsupported HTTP version 1.{minor}")]
    UnsupportedVersion { minor: u8 },

    #[error("invalid port in request target: {0:?}")]
    InvalidPort(String),

    #[error("request target has no host and no Host header was sent")]
    MissingHost,
}

/// The first line of a request: method, request target and version.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::{Method, RequestLine, Version};
///
/// let line = RequestLine::parse("GET http://example.com/index.html HTTP/1.1").unwrap();
/// assert_eq!(line.method(), &Method::Get);
/// assert_eq!(line.target(), "http://example.com/index.html");
/// assert_eq!(line.version(), Version::Http11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    target: String,
    version: Version,
}

impl RequestLine {
    /// Parses a single request line. Trailing CR/LF is ignored.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Parse`]: the line is not a valid HTTP/1.x request line.
    /// - [`RequestError::UnsupportedVersion`]: the version is neither 1.0 nor 1.1.
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        // httparse wants a whole request head, so terminate the line with an
        // empty header block.
        let raw = format!("{}\r\n\r\n", line.trim_end_matches(['\r', '\n']));
        let mut headers = [httparse::EMPTY_HEADER; 0];
        let mut req = httparse::Request::new(&mut headers);

        if req.parse(raw.as_bytes())?.is_partial() {
            return Err(RequestError::MissingField { field: "version" });
        }

        let method: Method = req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});
        let target = req
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();
        let version = match req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?
        {
            0 => Version::Http10,
            1 => Version::Http11,
            minor => return Err(RequestError::UnsupportedVersion { minor }),
        };

        Ok(Self {
            method,
            target,
            version,
        })
    }

    /// The first whitespace-separated token of a raw request line, read as a
    /// method. `None` for a blank line.
    ///
    /// ```
    /// use cacheproxy::http::{Method, RequestLine};
    ///
    /// assert_eq!(RequestLine::method_token("post /x HTTP/2.0"), Some(Method::Post));
    /// assert_eq!(RequestLine::method_token("   "), None);
    /// ```
    pub fn method_token(line: &str) -> Option<Method> {
        line.split_whitespace()
            .next()
            .map(|token| token.parse().unwrap_or_else(|never| match never {}))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as the client sent it. This is the
    /// cache key.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }
}

/// Accumulates header lines until the blank line that ends the request head.
#[derive(Debug, Default)]
pub struct HeaderReader {
    headers: Headers,
}

impl HeaderReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (with or without its CRLF). Returns `true` once the
    /// terminating blank line has been seen.
    ///
    /// Lines that are not valid header fields are skipped; a sloppy client
    /// header never fails the whole request.
    pub fn feed(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return true;
        }

        let raw = format!("{line}\r\n\r\n");
        let mut parsed = [httparse::EMPTY_HEADER; 1];
        match httparse::parse_headers(raw.as_bytes(), &mut parsed) {
            Ok(httparse::Status::Complete((_, [header]))) => {
                match std::str::from_utf8(header.value) {
                    Ok(value) => self.headers.insert(header.name, value),
                    Err(_) => debug!(name = header.name, "skipping non-UTF-8 header"),
                }
            }
            Ok(_) => debug!(line, "skipping incomplete header line"),
            Err(e) => debug!(line, error = %e, "skipping malformed header line"),
        }
        false
    }

    pub fn into_headers(self) -> Headers {
        self.headers
    }
}

/// Where a request is going: the origin's host and port plus the path to ask for.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::{Headers, Target};
///
/// let target = Target::resolve("http://example.com:8080/a?b=c", &Headers::new()).unwrap();
/// assert_eq!(target.host(), "example.com");
/// assert_eq!(target.port(), 8080);
/// assert_eq!(target.path(), "/a?b=c");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    path: String,
}

impl Target {
    pub const DEFAULT_PORT: u16 = 80;

    /// Resolves the origin for a request target.
    ///
    /// Absolute-form targets (`http://host[:port]/path`) carry the authority
    /// themselves. Origin-form targets (`/path`) take it from the `Host` header.
    ///
    /// # Errors
    ///
    /// - [`RequestError::MissingHost`]: neither the target nor the headers name a host.
    /// - [`RequestError::InvalidPort`]: the port is not a valid `u16`.
    pub fn resolve(target: &str, headers: &Headers) -> Result<Self, RequestError> {
        let (authority, path) = match strip_scheme(target) {
            Some(rest) => match rest.find(['/', '?']) {
                Some(pos) => (rest[..pos].to_owned(), rest[pos..].to_owned()),
                None => (rest.to_owned(), String::new()),
            },
            None => (
                headers
                    .get("host")
                    .ok_or(RequestError::MissingHost)?
                    .trim()
                    .to_owned(),
                target.to_owned(),
            ),
        };

        let (host, port) = split_authority(&authority)?;
        if host.is_empty() {
            return Err(RequestError::MissingHost);
        }

        let path = if path.is_empty() {
            "/".to_owned()
        } else if path.starts_with('?') {
            format!("/{path}")
        } else {
            path
        };

        Ok(Self { host, port, path })
    }

    /// The host as written in the request (IPv6 literals keep their brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host in the form a socket connect expects.
    pub fn connect_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn strip_scheme(target: &str) -> Option<&str> {
    const SCHEME: &str = "http://";
    target
        .get(..SCHEME.len())
        .filter(|s| s.eq_ignore_ascii_case(SCHEME))
        .map(|_| &target[SCHEME.len()..])
}

fn split_authority(authority: &str) -> Result<(String, u16), RequestError> {
    // Drop any userinfo.
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);

    let port_sep = if authority.starts_with('[') {
        authority.find(']').and_then(|end| {
            authority[end + 1..]
                .starts_with(':')
                .then_some(end + 1)
        })
    } else {
        authority.rfind(':')
    };

    match port_sep {
        Some(pos) => {
            let raw = &authority[pos + 1..];
            let port = if raw.is_empty() {
                Target::DEFAULT_PORT
            } else {
                raw.parse()
                    .map_err(|_| RequestError::InvalidPort(raw.to_owned()))?
            };
            Ok((authority[..pos].to_owned(), port))
        }
        None => Ok((authority.to_owned(), Target::DEFAULT_PORT)),
    }
}
