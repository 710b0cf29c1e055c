//! Immutable request snapshots.
//!
//! A [`StubRequest`] is captured once when a request arrives: the body is
//! fully materialized into [`Bytes`], so every predicate, middleware and
//! handler can read the same, unconsumed body from its own clone.

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};
use std::fmt;
use std::io::Cursor;

/// Snapshot of an inbound HTTP request.
#[derive(Debug, Clone)]
pub struct StubRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    received_at: chrono::DateTime<chrono::Utc>,
}

impl StubRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: body.into(),
            received_at: chrono::Utc::now(),
        }
    }

    /// Build a snapshot from a method and a path-and-query string.
    ///
    /// Mostly useful for driving [`crate::Router::dispatch`] directly in tests.
    pub fn from_parts(method: &str, path_and_query: &str, body: impl Into<Bytes>) -> Self {
        let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
        let uri = path_and_query
            .parse::<Uri>()
            .unwrap_or_else(|_| Uri::from_static("/"));
        Self::new(method, uri, HeaderMap::new(), body)
    }

    /// Add a header to the snapshot (builder style).
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::from_bytes(key.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded lossily as UTF-8.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// A fresh reader over the body. Each call starts at the beginning.
    pub fn body_reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    pub fn received_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.received_at
    }

    /// First decoded value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<String> {
        parse_query_pairs(self.query().unwrap_or(""))
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replace the path while keeping the query string (used for base-path stripping).
    pub(crate) fn with_path(mut self, path: &str) -> Self {
        let path_and_query = match self.uri.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };
        if let Ok(uri) = path_and_query.parse::<Uri>() {
            self.uri = uri;
        }
        self
    }

    /// Full textual dump of the request (method, target, headers, body).
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StubRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        writeln!(f, "{} {} HTTP/1.1", self.method, target)?;
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
        }
        writeln!(f)?;
        write!(f, "{}", String::from_utf8_lossy(&self.body))
    }
}

/// Parse a query string into decoded key/value pairs, preserving order.
///
/// Keys without `=` map to an empty value.
pub fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            // '+' is a space in form encoding
            let key = key.replace('+', " ");
            let value = value.replace('+', " ");
            (
                urlencoding::decode(&key).unwrap_or_default().into_owned(),
                urlencoding::decode(&value).unwrap_or_default().into_owned(),
            )
        })
        .collect()
}
