//! WebSocket sockets.
//!
//! # Responsibilities
//! - Own an upgraded connection through a writer task and a reader pump
//! - Give handlers a cloneable handle for reading, writing and pinging
//! - Report closure so stashes can reap dead sockets
//!
//! # Data Flow
//! ```text
//!            write()/ping()/close()
//! handle ────────────────────────▶ outbound queue ──▶ writer task ──▶ client
//! handle ◀──── read() ◀──── inbound queue ◀──── reader pump ◀──────── client
//!                                                   │ pong
//!                                                   ▼
//!                                               on_pong(handle)
//! ```
//!
//! # Design Decisions
//! - Writes never block the caller; frames queue until the writer sends them
//! - Either task ending flips the shared `closed` flag and stops the other
//! - When the last handle is dropped the writer sends a Close frame

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use axum::extract::ws::{Message, WebSocket as RawSocket};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};

use crate::net::connection::{wait_closed, SocketId};
use crate::stash::{SocketError, StashSocket};

/// Callback invoked with the socket whenever a pong arrives.
pub type PongCallback = Arc<dyn Fn(&WebSocket) + Send + Sync>;

/// A data frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

struct Shared {
    id: SocketId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: Arc<watch::Sender<bool>>,
}

/// Handle to a live WebSocket connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Shared>,
}

impl WebSocket {
    /// Take over an upgraded socket, spawning its writer and reader tasks.
    pub fn attach(socket: RawSocket, peer: SocketAddr, on_pong: Option<PongCallback>) -> Self {
        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::channel(false).0);

        let socket = WebSocket {
            inner: Arc::new(Shared {
                id: SocketId::new(),
                peer,
                outbound,
                inbound: Mutex::new(inbound),
                closed: Arc::clone(&closed),
            }),
        };

        tracing::debug!(socket_id = %socket.id(), peer_addr = %peer, "websocket attached");

        tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&closed), socket.id()));
        tokio::spawn(read_loop(
            stream,
            inbound_tx,
            closed,
            on_pong,
            Arc::downgrade(&socket.inner),
        ));

        socket
    }

    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Next frame from the client. `None` once the socket is closed and
    /// every received frame has been read.
    pub async fn read(&self) -> Option<Frame> {
        self.inner.inbound.lock().await.recv().await
    }

    /// Queue a text frame.
    pub fn write(&self, text: impl Into<String>) -> Result<(), SocketError> {
        self.send(Message::Text(text.into().into()))
    }

    /// Queue a binary frame.
    pub fn write_binary(&self, data: impl Into<Bytes>) -> Result<(), SocketError> {
        self.send(Message::Binary(data.into()))
    }

    /// Queue a ping frame.
    pub fn ping(&self) -> Result<(), SocketError> {
        self.send(Message::Ping(Bytes::new()))
    }

    fn send(&self, message: Message) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        self.inner
            .outbound
            .send(message)
            .map_err(|_| SocketError::Closed)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow() || self.inner.outbound.is_closed()
    }

    /// Resolves once the socket is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        wait_closed(&mut rx).await;
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StashSocket for WebSocket {
    const KIND: &'static str = "websocket";

    fn id(&self) -> SocketId {
        self.inner.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    fn is_closed(&self) -> bool {
        WebSocket::is_closed(self)
    }

    fn close(&self) {
        WebSocket::close(self)
    }

    fn send_text(&self, message: &str) -> Result<(), SocketError> {
        self.write(message)
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.inner.closed.subscribe();
        Box::pin(async move { wait_closed(&mut rx).await })
    }
}

async fn write_loop(
    mut sink: SplitSink<RawSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    closed: Arc<watch::Sender<bool>>,
    id: SocketId,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(err) = sink.send(message).await {
                    tracing::debug!(socket_id = %id, error = %err, "websocket write failed");
                    break;
                }
            }
            _ = wait_closed(&mut closed_rx) => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    closed.send_replace(true);
    let _ = sink.close().await;
    tracing::debug!(socket_id = %id, "websocket writer finished");
}

async fn read_loop(
    mut stream: SplitStream<RawSocket>,
    inbound: mpsc::UnboundedSender<Frame>,
    closed: Arc<watch::Sender<bool>>,
    on_pong: Option<PongCallback>,
    socket: Weak<Shared>,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = wait_closed(&mut closed_rx) => break,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let _ = inbound.send(Frame::Text(text.as_str().to_owned()));
            }
            Some(Ok(Message::Binary(data))) => {
                let _ = inbound.send(Frame::Binary(data));
            }
            Some(Ok(Message::Pong(_))) => {
                if let (Some(callback), Some(inner)) = (&on_pong, socket.upgrade()) {
                    callback(&WebSocket { inner });
                }
            }
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                tracing::debug!(error = %err, "websocket read failed");
                break;
            }
        }
    }
    closed.send_replace(true);
}
