//! Server-sent events.
//!
//! # Responsibilities
//! - Format `data:` and `event:` frames
//! - Wrap a detached event-stream response in an `EventSource` handle
//!   that can be stashed and written from other tasks
//!
//! # Data Flow
//! ```text
//! EventSource::message ──▶ channel ──▶ body stream ──▶ client
//!        ▲                                 │ dropped (client left / closed)
//!        │                                 ▼
//!   stash / task                 CloseGuard: closed = true, on_close()
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::stream::{channel_body, CloseGuard, OnClose};
use crate::net::connection::{wait_closed, SocketId};
use crate::stash::{SocketError, StashSocket};

fn data_text(data: Value) -> String {
    match data {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// `data: <data>\n\n`. Structured data is JSON-serialized.
pub fn sse_message(data: impl Into<Value>) -> String {
    format!("data: {}\n\n", data_text(data.into()))
}

/// `event: <name>\ndata: <data>\n\n`.
pub fn sse_event(name: &str, data: impl Into<Value>) -> String {
    format!("event: {}\ndata: {}\n\n", name, data_text(data.into()))
}

struct Shared {
    id: SocketId,
    peer: SocketAddr,
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: Arc<watch::Sender<bool>>,
    on_close: OnClose,
}

/// Handle to a live event-stream response.
#[derive(Clone)]
pub struct EventSource {
    inner: Arc<Shared>,
}

/// Body half of an event stream, consumed by the responder.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    guard: CloseGuard,
}

impl EventStream {
    pub(crate) fn into_body(self) -> Body {
        channel_body(self.rx, self.guard, |frame| frame)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl EventSource {
    /// Open an event stream for `peer`. `on_close` fires once the body is
    /// gone, whichever side ends it.
    pub fn open(peer: SocketAddr, on_close: OnClose) -> (EventSource, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::channel(false).0);
        let source = EventSource {
            inner: Arc::new(Shared {
                id: SocketId::new(),
                peer,
                tx: Mutex::new(Some(tx)),
                closed: Arc::clone(&closed),
                on_close: on_close.clone(),
            }),
        };
        let stream = EventStream {
            rx,
            guard: CloseGuard::new(on_close, Some(closed)),
        };
        (source, stream)
    }

    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Write a raw, already framed chunk.
    pub fn write(&self, frame: impl Into<String>) -> Result<(), SocketError> {
        let tx = self.inner.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = tx.as_ref().ok_or(SocketError::Closed)?;
        tx.send(Bytes::from(frame.into()))
            .map_err(|_| SocketError::Closed)
    }

    /// Write a `data:` frame.
    pub fn message(&self, data: impl Into<Value>) -> Result<(), SocketError> {
        self.write(sse_message(data))
    }

    /// Write a named event frame.
    pub fn event(&self, name: &str, data: impl Into<Value>) -> Result<(), SocketError> {
        self.write(sse_event(name, data))
    }

    /// End the stream. Idempotent.
    pub fn close(&self) {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(tx);
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        if *self.inner.closed.borrow() {
            return true;
        }
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }

    /// Install the close callback.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.on_close.set(callback);
    }

    /// Resolves once the stream is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        wait_closed(&mut rx).await;
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StashSocket for EventSource {
    const KIND: &'static str = "sse";

    fn id(&self) -> SocketId {
        self.inner.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    fn is_closed(&self) -> bool {
        EventSource::is_closed(self)
    }

    fn close(&self) {
        EventSource::close(self)
    }

    fn send_text(&self, message: &str) -> Result<(), SocketError> {
        self.message(message)
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.inner.closed.subscribe();
        Box::pin(async move { wait_closed(&mut rx).await })
    }
}
