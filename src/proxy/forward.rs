//! Building the upstream request and collecting the cacheable copy of the
//! origin's response.

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::{Headers, RequestLine, Target};

/// Client headers the proxy never forwards; it writes its own versions.
pub const REPLACED_HEADERS: [&str; 4] = ["Host", "User-Agent", "Connection", "Proxy-Connection"];

/// Serializes the request sent to the origin as one contiguous buffer.
///
/// The request line repeats the client's method and target as received, with
/// the version downgraded to `HTTP/1.0`. Client
/// headers follow in receipt order, minus [`REPLACED_HEADERS`], then the
/// proxy's `Host`, `Connection`, `Proxy-Connection` and `User-Agent`.
pub fn build_request(
    line: &RequestLine,
    target: &Target,
    headers: &Headers,
    user_agent: &str,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256 + headers.len() * 48);

    buf.put(
        format!(
            "{} {} {}\r\n",
            line.method(),
            line.target(),
            line.version().downgraded()
        )
        .as_bytes(),
    );

    for (name, value) in headers.iter_except(&REPLACED_HEADERS) {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }

    buf.put(format!("Host: {}:{}\r\n", target.host(), target.port()).as_bytes());
    buf.put(&b"Connection: close\r\n"[..]);
    buf.put(&b"Proxy-Connection: close\r\n"[..]);
    buf.put(format!("User-Agent: {user_agent}\r\n").as_bytes());
    buf.put(&b"\r\n"[..]);

    buf
}

/// Collects relayed response bytes while they still fit the object cap.
///
/// Once the running total passes the cap the partial copy is dropped; the
/// total keeps counting so callers can still report how much was relayed.
#[derive(Debug)]
pub struct ObjectBuffer {
    buf: Option<BytesMut>,
    total: usize,
    cap: usize,
}

impl ObjectBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Some(BytesMut::new()),
            total: 0,
            cap,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        if self.total > self.cap {
            self.buf = None;
        } else if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(chunk);
        }
    }

    /// Bytes seen so far, cached or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The complete body, if it never exceeded the cap.
    pub fn into_cacheable(self) -> Option<Bytes> {
        self.buf.map(BytesMut::freeze)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &str, headers: &[(&str, &str)]) -> String {
        let line = RequestLine::parse(line).unwrap();
        let mut h = Headers::new();
        for (k, v) in headers {
            h.insert(*k, *v);
        }
        let target = Target::resolve(line.target(), &h).unwrap();
        String::from_utf8(build_request(&line, &target, &h, "test-agent").to_vec()).unwrap()
    }

    #[test]
    fn rewrites_request_line_and_appends_fixed_headers() {
        let s = request("GET http://origin.test:8000/a?b=1 HTTP/1.1", &[]);
        assert_eq!(
            s,
            "GET http://origin.test:8000/a?b=1 HTTP/1.0\r\n\
             Host: origin.test:8000\r\n\
             Connection: close\r\n\
             Proxy-Connection: close\r\n\
             User-Agent: test-agent\r\n\
             \r\n"
        );
    }

    #[test]
    fn filters_replaced_headers_and_keeps_order() {
        let s = request(
            "get http://origin.test/ HTTP/1.0",
            &[
                ("Accept", "*/*"),
                ("Host", "elsewhere"),
                ("user-agent", "curl/8"),
                ("Cookie", "a=1"),
                ("Connection", "keep-alive"),
                ("Proxy-Connection", "keep-alive"),
                ("X-Forwarded-Host", "kept"),
            ],
        );
        assert_eq!(
            s,
            "GET http://origin.test/ HTTP/1.0\r\n\
             Accept: */*\r\n\
             Cookie: a=1\r\n\
             X-Forwarded-Host: kept\r\n\
             Host: origin.test:80\r\n\
             Connection: close\r\n\
             Proxy-Connection: close\r\n\
             User-Agent: test-agent\r\n\
             \r\n"
        );
    }

    #[test]
    fn object_buffer_within_cap() {
        let mut b = ObjectBuffer::new(10);
        b.push(b"hello");
        b.push(b"world");
        assert_eq!(b.total(), 10);
        assert_eq!(b.into_cacheable().unwrap().as_ref(), b"helloworld");
    }

    #[test]
    fn object_buffer_over_cap_stays_dropped() {
        let mut b = ObjectBuffer::new(10);
        b.push(b"hello");
        b.push(b"world!");
        b.push(b"");
        assert_eq!(b.total(), 11);
        assert!(b.into_cacheable().is_none());
    }

    #[test]
    fn object_buffer_empty_body_is_cacheable() {
        let b = ObjectBuffer::new(10);
        assert_eq!(b.into_cacheable().unwrap().len(), 0);
    }
}
