//! Locally generated HTTP/1.0 error pages.
//!
//! Successful responses are never built by the proxy: they come from the
//! origin or the cache as opaque bytes. The only responses serialized here
//! are the small HTML pages sent when a request cannot be served at all.

use bytes::{BufMut, BytesMut};

use super::StatusCode;

/// An HTML error page, ready to be serialized and sent to a client.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::{ErrorPage, StatusCode};
///
/// let page = ErrorPage::new(StatusCode::NotImplemented, "Not implemented")
///     .cause("POST")
///     .detail("Proxy does not implement this method");
///
/// let bytes = page.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.0 501 Not implemented\r\n"));
/// assert!(text.contains("Content-type: text/html\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorPage {
    status: StatusCode,
    short_msg: String,
    detail: String,
    cause: String,
}

impl ErrorPage {
    /// Creates an error page with the given status and short message. The
    /// short message appears both in the status line and in the body.
    pub fn new(status: StatusCode, short_msg: impl Into<String>) -> Self {
        Self {
            status,
            short_msg: short_msg.into(),
            detail: status.canonical_reason().to_owned(),
            cause: String::new(),
        }
    }

    /// Sets the longer explanation shown in the body.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Sets what triggered the error (a method name, a request target, ...).
    #[must_use]
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = cause.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn body(&self) -> String {
        format!(
            "<html><title>Proxy Error</title><body bgcolor=\"ffffff\">\r\n\
             {code}: {short}\r\n\
             <p>{detail}: {cause}\r\n\
             <hr><em>cacheproxy</em>\r\n",
            code = self.status.as_u16(),
            short = self.short_msg,
            detail = self.detail,
            cause = self.cause,
        )
    }

    /// Serializes the page: status line, `Content-type`, `Content-length`,
    /// blank line, HTML body.
    pub fn into_bytes(self) -> BytesMut {
        let body = self.body();
        let mut buf = BytesMut::with_capacity(128 + body.len());

        buf.put(format!("HTTP/1.0 {} {}\r\n", self.status.as_u16(), self.short_msg).as_bytes());
        buf.put(&b"Content-type: text/html\r\n"[..]);
        buf.put(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.put(body.as_bytes());

        buf
    }
}
