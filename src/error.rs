//! Error taxonomy for request handling.
//!
//! # Responsibilities
//! - Classify failures raised while serving a request
//! - Map each class to a response status
//! - Carry the user-visible payload rendered by the responder
//!
//! # Design Decisions
//! - `BadRequest`, `Request` and `NotFound` are expected failures and never
//!   produce a backtrace-style log line
//! - `Internal` is everything else, including caught panics
//! - A `RequestError` payload may be a plain message or a structured JSON value

use std::fmt;

use axum::http::StatusCode;
use serde_json::Value;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// User-visible payload of a failed request.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// Plain message.
    Message(String),
    /// Structured value, rendered as JSON.
    Structured(Value),
}

impl ErrorPayload {
    /// Payload as a JSON value, used for `{"error": ...}` bodies.
    pub fn to_json(&self) -> Value {
        match self {
            ErrorPayload::Message(message) => Value::String(message.clone()),
            ErrorPayload::Structured(value) => value.clone(),
        }
    }

    /// Payload as response text for non-JSON routes.
    pub fn to_text(&self) -> String {
        match self {
            ErrorPayload::Message(message) => message.clone(),
            ErrorPayload::Structured(value) => value.to_string(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// A failure raised deliberately by application code.
///
/// Defaults to `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{payload}")]
pub struct RequestError {
    status: StatusCode,
    payload: ErrorPayload,
}

impl RequestError {
    /// Request error with a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            payload: ErrorPayload::Message(message.into()),
        }
    }

    /// Request error with a structured payload.
    pub fn structured(value: Value) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            payload: ErrorPayload::Structured(value),
        }
    }

    /// Override the response status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn payload(&self) -> &ErrorPayload {
        &self.payload
    }
}

/// Every failure the request pipeline knows how to render.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input: bad JSON, bad form encoding, invalid response JSON.
    #[error("{0}")]
    BadRequest(String),

    /// Application-raised failure with its own status and payload.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// No route, view, or file matched.
    #[error("Not Found")]
    NotFound,

    /// Anything unexpected.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Response status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Request(err) => err.status(),
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Payload rendered into the response body.
    pub fn payload(&self) -> ErrorPayload {
        match self {
            Error::Request(err) => err.payload().clone(),
            other => ErrorPayload::Message(other.to_string()),
        }
    }

    /// Whether this failure was anticipated by the application.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Error::Internal(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BadRequest(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Internal(err.to_string()),
        }
    }
}

impl From<crate::stash::SocketError> for Error {
    fn from(err: crate::stash::SocketError) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_error_defaults_to_bad_request() {
        let err = RequestError::new("nope");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let teapot = RequestError::new("short").with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(Error::from(teapot).status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn structured_payload_renders_compact_json() {
        let err = RequestError::structured(json!({"msg": "error"}));
        assert_eq!(err.payload().to_text(), r#"{"msg":"error"}"#);
        assert_eq!(err.payload().to_json(), json!({"msg": "error"}));
    }

    #[test]
    fn only_internal_is_unexpected() {
        assert!(Error::BadRequest("x".into()).is_expected());
        assert!(Error::NotFound.is_expected());
        assert!(!Error::Internal("x".into()).is_expected());
    }

    #[test]
    fn json_errors_are_bad_requests() {
        let err = serde_json::from_str::<Value>("{").unwrap_err();
        assert_eq!(Error::from(err).status(), StatusCode::BAD_REQUEST);
    }
}
