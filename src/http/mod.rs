//! HTTP/1.x protocol types used by the proxy.
//!
//! This module provides the primitives the connection handler consumes:
//! [`Method`], [`Version`], [`StatusCode`], [`Headers`], the request-line and
//! header parsers in [`request`], and the HTTP/1.0 error page in [`response`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{HeaderReader, RequestError, RequestLine, Target};
pub use response::ErrorPage;

/// An HTTP response status code the proxy can produce on its own.
///
/// Responses relayed from an origin are passed through byte-for-byte and never
/// decoded, so only the codes used for locally generated error pages appear here.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::StatusCode;
///
/// let status = StatusCode::NotImplemented;
/// assert_eq!(status.as_u16(), 501);
/// assert_eq!(status.canonical_reason(), "Not Implemented");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    BadRequest = 400,
    NotImplemented = 501,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::NotImplemented => "Not Implemented",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// An HTTP request method.
///
/// Parsing is case-insensitive, so `get` and `GET` both yield [`Method::Get`].
/// Non-standard methods are captured verbatim in the `Custom` variant.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::Method;
///
/// let method: Method = "get".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Connect,
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as an upper-case string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KNOWN: [Method; 9] = [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
            Method::Patch,
            Method::Connect,
            Method::Trace,
        ];

        Ok(KNOWN
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .unwrap_or_else(|| Self::Custom(s.to_owned())))
    }
}

/// HTTP protocol version of a request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// The version the proxy speaks upstream: every `HTTP/1.1` request is sent
    /// as short-lived `HTTP/1.0`.
    pub fn downgraded(self) -> Self {
        Self::Http10
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
