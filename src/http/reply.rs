//! Handler results.
//!
//! A handler returns `Ok(Reply)` for a normal response or `Err(Interrupt)`
//! to stop early: either a deliberate [`Halt`] with its own status and body,
//! or a failure that the responder renders as an error response.

use axum::http::StatusCode;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::sse::EventStream;
use super::stream::ChunkStream;
use crate::error::{Error, RequestError};
use crate::params::ParamsMap;
use crate::stash::SocketError;

/// Response body produced by a handler or carried by a halt.
#[derive(Debug, Default)]
pub enum Reply {
    /// Empty body.
    #[default]
    Empty,
    /// Text body; validated as JSON on JSON routes.
    Text(String),
    /// Raw bytes sent as-is.
    Bytes(Bytes),
    /// Structured body; serialized on JSON routes, rejected on others.
    Json(Value),
    /// Chunked body; requires chunked transfer encoding on the context.
    Chunks(ChunkStream),
    /// Detached server-sent event stream.
    EventStream(EventStream),
}

impl Reply {
    /// Serialize any value into a structured reply.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        serde_json::to_value(value)
            .map(Reply::Json)
            .map_err(|err| Error::Internal(err.to_string()))
    }

    /// Chunked reply over a finite sequence.
    pub fn chunks<I, V>(chunks: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Reply::Chunks(ChunkStream::from_iter(chunks))
    }

    pub fn is_event_stream(&self) -> bool {
        matches!(self, Reply::EventStream(_))
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

impl From<ParamsMap> for Reply {
    fn from(params: ParamsMap) -> Self {
        Reply::Json(params.into())
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Reply::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Reply::Bytes(Bytes::from(bytes))
    }
}

/// Early exit with an explicit status and body.
#[derive(Debug)]
pub struct Halt {
    pub status: StatusCode,
    pub body: Reply,
}

impl Default for Halt {
    /// `400 Bad Request` with an empty body.
    fn default() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: Reply::Empty,
        }
    }
}

/// Why a filter or handler stopped.
#[derive(Debug)]
pub enum Interrupt {
    Halt(Halt),
    Fail(Error),
}

impl Interrupt {
    pub fn is_halt(&self) -> bool {
        matches!(self, Interrupt::Halt(_))
    }
}

/// Halt with `status` and `body`.
pub fn halt(status: StatusCode, body: impl Into<Reply>) -> Interrupt {
    Interrupt::Halt(Halt {
        status,
        body: body.into(),
    })
}

impl From<Halt> for Interrupt {
    fn from(halt: Halt) -> Self {
        Interrupt::Halt(halt)
    }
}

impl From<Error> for Interrupt {
    fn from(err: Error) -> Self {
        Interrupt::Fail(err)
    }
}

impl From<RequestError> for Interrupt {
    fn from(err: RequestError) -> Self {
        Interrupt::Fail(err.into())
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(err: serde_json::Error) -> Self {
        Interrupt::Fail(err.into())
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(err: std::io::Error) -> Self {
        Interrupt::Fail(err.into())
    }
}

impl From<SocketError> for Interrupt {
    fn from(err: SocketError) -> Self {
        Interrupt::Fail(err.into())
    }
}

/// What an HTTP handler returns.
pub type HandlerResult = Result<Reply, Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversions() {
        assert!(matches!(Reply::from("x"), Reply::Text(ref t) if t == "x"));
        assert!(matches!(Reply::from(json!({"a": 1})), Reply::Json(_)));
        assert!(matches!(Reply::from(()), Reply::Empty));
        assert!(matches!(Reply::from(vec![1u8, 2]), Reply::Bytes(_)));
    }

    #[test]
    fn default_halt_is_bad_request() {
        let halt = Halt::default();
        assert_eq!(halt.status, StatusCode::BAD_REQUEST);
        assert!(matches!(halt.body, Reply::Empty));
    }

    #[test]
    fn errors_convert_to_failures() {
        let interrupt: Interrupt = RequestError::new("bad").into();
        assert!(!interrupt.is_halt());
        assert!(halt(StatusCode::OK, "fine").is_halt());
    }
}
