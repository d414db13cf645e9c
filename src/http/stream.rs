//! Streaming response bodies.
//!
//! # Responsibilities
//! - Chunked responses fed by a producer task through a channel
//! - One-shot close callbacks fired when a streamed body finishes or the
//!   client goes away
//!
//! # Data Flow
//! ```text
//! producer task ──ChunkWriter::write──▶ channel ──▶ body stream ──▶ hyper
//!                                                     │ (dropped)
//!                                                     ▼
//!                                               CloseGuard → on_close()
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use futures_util::stream;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::Error;
use crate::stash::SocketError;

type Callback = Box<dyn FnOnce() + Send>;

/// Shared slot for a close callback. Fires at most once.
#[derive(Clone, Default)]
pub struct OnClose(Arc<Mutex<Option<Callback>>>);

impl OnClose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback, replacing any previous one.
    pub fn set(&self, callback: impl FnOnce() + Send + 'static) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(callback));
    }

    /// Run the callback if one is installed and has not run yet.
    pub fn fire(&self) {
        let callback = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl fmt::Debug for OnClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnClose").field("set", &self.is_set()).finish()
    }
}

/// Lives inside a streamed body; runs close hooks when the body is dropped.
pub(crate) struct CloseGuard {
    on_close: OnClose,
    closed: Option<Arc<watch::Sender<bool>>>,
}

impl CloseGuard {
    pub(crate) fn new(on_close: OnClose, closed: Option<Arc<watch::Sender<bool>>>) -> Self {
        Self { on_close, closed }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(closed) = &self.closed {
            closed.send_replace(true);
        }
        self.on_close.fire();
    }
}

/// Turn a channel of frames into a response body.
pub(crate) fn channel_body<T, F>(rx: mpsc::UnboundedReceiver<T>, guard: CloseGuard, encode: F) -> Body
where
    T: Send + 'static,
    F: Fn(T) -> Bytes + Send + 'static,
{
    let frames = stream::unfold((rx, guard, encode), |(mut rx, guard, encode)| async move {
        let frame = rx.recv().await?;
        let bytes = encode(frame);
        Some((Ok::<Bytes, Infallible>(bytes), (rx, guard, encode)))
    });
    Body::from_stream(frames)
}

/// Write side of a chunked response.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChunkWriter {
    /// Queue one chunk. Strings are written as-is on non-JSON routes;
    /// JSON routes serialize every chunk and end it with a newline.
    pub fn write(&self, chunk: impl Into<Value>) -> Result<(), SocketError> {
        self.tx.send(chunk.into()).map_err(|_| SocketError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side of a chunked response, held by the reply until it is sent.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ChunkStream {
    /// Open a chunk channel.
    pub fn channel() -> (ChunkWriter, ChunkStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChunkWriter { tx }, ChunkStream { rx })
    }

    /// Chunk stream over a finite sequence.
    pub fn from_iter<I, V>(chunks: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let (writer, stream) = Self::channel();
        for chunk in chunks {
            // Receiver is alive in `stream`; sending cannot fail here.
            let _ = writer.write(chunk);
        }
        stream
    }

    /// Spawn `producer` and return the stream it feeds.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(ChunkWriter) -> Fut,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let (writer, stream) = Self::channel();
        let task = producer(writer);
        tokio::spawn(async move {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "chunked response producer failed");
            }
        });
        stream
    }

    pub(crate) fn into_body(self, json: bool, on_close: OnClose) -> Body {
        channel_body(self.rx, CloseGuard::new(on_close, None), move |chunk| {
            encode_chunk(chunk, json)
        })
    }
}

fn encode_chunk(chunk: Value, json: bool) -> Bytes {
    if json {
        let mut line = chunk.to_string();
        line.push('\n');
        return Bytes::from(line);
    }
    match chunk {
        Value::String(text) => Bytes::from(text),
        other => Bytes::from(other.to_string()),
    }
}
