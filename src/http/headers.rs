//! Ordered request header list with case-insensitive name lookup.
//!
//! The proxy forwards client headers in the order it received them, so this is
//! a plain vector of pairs rather than a map.

/// A case-insensitive, order-preserving list of HTTP header fields.
///
/// # Examples
///
/// ```
/// use cacheproxy::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Host", "example.com");
/// headers.insert("Accept", "*/*");
///
/// assert_eq!(headers.get("host"), Some("example.com"));
/// let kept: Vec<_> = headers.iter_except(&["Host"]).collect();
/// assert_eq!(kept, vec![("Accept", "*/*")]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header entry. Repeated names are kept as separate entries.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in receipt order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Like [`iter`](Self::iter), but skips every entry whose name matches one
    /// of `excluded` (case-insensitive, whole-name match).
    pub fn iter_except<'a>(
        &'a self,
        excluded: &'a [&'a str],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.iter()
            .filter(move |(name, _)| !excluded.iter().any(|x| x.eq_ignore_ascii_case(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Host", "origin.test:8080");
        assert_eq!(h.get("host"), Some("origin.test:8080"));
        assert_eq!(h.get("HOST"), Some("origin.test:8080"));
        assert_eq!(h.get("x-missing"), None);
    }

    #[test]
    fn except_matches_whole_names_only() {
        let mut h = Headers::new();
        h.insert("Connection", "keep-alive");
        h.insert("Proxy-Connection", "keep-alive");
        h.insert("X-Forwarded-Host", "a.test");
        h.insert("accept", "*/*");

        let kept: Vec<_> = h
            .iter_except(&["Host", "Connection", "Proxy-Connection"])
            .map(|(k, _)| k)
            .collect();
        assert_eq!(kept, vec!["X-Forwarded-Host", "accept"]);
    }

    #[test]
    fn repeated_names_are_kept_in_order() {
        let mut h = Headers::new();
        h.insert("Cookie", "a=1");
        h.insert("Accept", "*/*");
        h.insert("cookie", "b=2");
        assert_eq!(h.len(), 3);
        assert_eq!(h.get("COOKIE"), Some("a=1"));
        let all: Vec<_> = h.iter().collect();
        assert_eq!(all, vec![("Cookie", "a=1"), ("Accept", "*/*"), ("cookie", "b=2")]);
    }
}
