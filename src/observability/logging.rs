//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Emit exactly one access log event per response
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Access events go to the `skein::access` target in common-log form,
//!   with the same data repeated as structured fields

use std::net::SocketAddr;

use axum::http::{Method, StatusCode, Uri, Version};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Common-log style line: `ip - - "GET /path HTTP/1.1" 200 12`.
/// Streamed bodies log `-` for the size.
pub fn access_line(
    remote: SocketAddr,
    method: &Method,
    uri: &Uri,
    version: Version,
    status: StatusCode,
    size: Option<usize>,
) -> String {
    let size = size.map_or_else(|| "-".to_string(), |size| size.to_string());
    format!(
        "{} - - \"{} {} HTTP/{}\" {} {}",
        remote.ip(),
        method,
        uri,
        version_label(version),
        status.as_u16(),
        size
    )
}

/// Emit the access event for one response and count it.
pub fn log_response(
    remote: SocketAddr,
    method: &Method,
    uri: &Uri,
    version: Version,
    status: StatusCode,
    size: Option<usize>,
) {
    let line = access_line(remote, method, uri, version, status, size);
    tracing::info!(
        target: "skein::access",
        remote = %remote.ip(),
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        size = ?size,
        "{line}"
    );
    super::metrics::record_request(method, status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_line_format() {
        let line = access_line(
            "10.1.2.3:5555".parse().unwrap(),
            &Method::GET,
            &Uri::from_static("/hello?x=1"),
            Version::HTTP_11,
            StatusCode::OK,
            Some(12),
        );
        assert_eq!(line, "10.1.2.3 - - \"GET /hello?x=1 HTTP/1.1\" 200 12");
    }

    #[test]
    fn streamed_size_is_dash() {
        let line = access_line(
            "127.0.0.1:1".parse().unwrap(),
            &Method::GET,
            &Uri::from_static("/sse"),
            Version::HTTP_2,
            StatusCode::OK,
            None,
        );
        assert!(line.ends_with("HTTP/2.0\" 200 -"));
    }
}
