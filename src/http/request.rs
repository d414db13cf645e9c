//! Buffered request view handed to filters and handlers.
//!
//! # Responsibilities
//! - Hold method, URI, version, headers, body and peer address
//! - Case-insensitive header lookup, accepting `_` for `-`
//! - Detect WebSocket upgrade requests
//!
//! # Design Decisions
//! - The body is read fully before routing completes; handlers see `Bytes`
//! - Request IDs are assigned by the tower-http layer in front of dispatch

use std::net::SocketAddr;

use axum::http::{
    header::{CONNECTION, UPGRADE},
    request::Parts,
    HeaderMap, Method, Uri, Version,
};
use bytes::Bytes;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// An HTTP request with its body already buffered.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    peer: SocketAddr,
}

impl Request {
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        body: Bytes,
        peer: SocketAddr,
    ) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
            body,
            peer,
        }
    }

    /// Build from request parts; the parts are left untouched.
    pub fn from_parts(parts: &Parts, body: Bytes, peer: SocketAddr) -> Self {
        Self::new(
            parts.method.clone(),
            parts.uri.clone(),
            parts.version,
            parts.headers.clone(),
            body,
            peer,
        )
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

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value by name. `_` is read as `-` and case is ignored.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.replace('_', "-");
        self.headers
            .get(name.as_str())
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Correlation ID assigned to this request, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
    }
}

/// Whether the headers ask for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(headers: HeaderMap) -> Request {
        Request::new(
            Method::GET,
            Uri::from_static("/path?a=1"),
            Version::HTTP_11,
            headers,
            Bytes::new(),
            "127.0.0.1:9000".parse().unwrap(),
        )
    }

    #[test]
    fn header_lookup_accepts_underscores() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let req = request(headers);
        assert_eq!(req.header("content_type"), Some("text/plain"));
        assert_eq!(req.header("Content-Type"), Some("text/plain"));
        assert_eq!(req.header("missing"), None);
        assert_eq!(req.path(), "/path");
        assert_eq!(req.query(), Some("a=1"));
    }

    #[test]
    fn upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_websocket_upgrade(&headers));

        headers.remove(CONNECTION);
        assert!(!is_websocket_upgrade(&headers));
    }
}
