//! Named collections of live sockets.
//!
//! # Responsibilities
//! - Group WebSocket or SSE sockets under context names
//! - Iterate a context (or all of them) while tolerating dead sockets
//! - Remove sockets idempotently, closing them and forgetting their peer
//! - Reap sockets automatically once they close
//!
//! # Data Flow
//! ```text
//! handler ── add(ctx, socket) ──▶ contexts[ctx] ◀── each / broadcast
//!                                     ▲
//!   socket closes ── reaper task ─────┘ remove(ctx, socket)
//! ```
//!
//! # Design Decisions
//! - Iteration works on a snapshot taken under the lock; callbacks run
//!   without it, so a callback may add or remove sockets
//! - A socket whose write fails during iteration is removed, and iteration
//!   continues with the next one
//! - Peer addresses are kept in a side table for diagnostics only

pub mod keepalive;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::http::{EventSource, WebSocket};
use crate::net::SocketId;
use crate::observability::metrics;

/// Context used when none is named.
pub const DEFAULT_CONTEXT: &str = "default";

/// Failure writing to a stashed socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("socket closed")]
    Closed,

    #[error("socket i/o error: {0}")]
    Io(String),
}

/// A socket that can live in a stash.
pub trait StashSocket: Clone + Send + Sync + 'static {
    /// Label used in logs and metrics.
    const KIND: &'static str;

    fn id(&self) -> SocketId;
    fn peer_addr(&self) -> SocketAddr;
    fn is_closed(&self) -> bool;
    fn close(&self);
    fn send_text(&self, message: &str) -> Result<(), SocketError>;
    /// Resolves once the socket is closed.
    fn closed(&self) -> BoxFuture<'static, ()>;
}

struct StashInner<S> {
    contexts: Mutex<HashMap<String, Vec<S>>>,
    peers: DashMap<SocketId, SocketAddr>,
}

/// Shared stash of sockets keyed by context name.
pub struct ConnectionStash<S> {
    inner: Arc<StashInner<S>>,
}

pub type WebSocketStash = ConnectionStash<WebSocket>;
pub type SseStash = ConnectionStash<EventSource>;

impl<S> Clone for ConnectionStash<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StashSocket> Default for ConnectionStash<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StashSocket> ConnectionStash<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StashInner {
                contexts: Mutex::new(HashMap::new()),
                peers: DashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<S>>> {
        self.inner
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_size(&self) {
        metrics::record_stash_size(S::KIND, self.total_len());
    }

    /// Add `socket` to `context` and start watching it for closure.
    pub fn add(&self, context: &str, socket: S) {
        let id = socket.id();
        {
            let mut contexts = self.lock();
            let sockets = contexts.entry(context.to_string()).or_default();
            if sockets.iter().any(|existing| existing.id() == id) {
                return;
            }
            sockets.push(socket.clone());
            // Recorded under the contexts lock so a racing remove sees it.
            self.inner.peers.insert(id, socket.peer_addr());
        }
        self.record_size();

        tracing::debug!(
            kind = S::KIND,
            socket_id = %id,
            context,
            "socket stashed"
        );

        if socket.is_closed() {
            self.remove(context, &socket);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let stash = self.clone();
                let context = context.to_string();
                runtime.spawn(async move {
                    socket.closed().await;
                    stash.remove(&context, &socket);
                });
            }
            Err(_) => {
                tracing::debug!(socket_id = %id, "no runtime, socket will be reaped by sweep");
            }
        }
    }

    /// Add to the default context.
    pub fn push(&self, socket: S) {
        self.add(DEFAULT_CONTEXT, socket);
    }

    /// Handle scoped to one context. Creates the context if needed.
    pub fn context(&self, name: &str) -> StashContext<S> {
        self.lock().entry(name.to_string()).or_default();
        StashContext {
            stash: self.clone(),
            name: name.to_string(),
        }
    }

    /// Remove `socket` from `context`. Returns whether it was present.
    ///
    /// A removed socket is closed. Its peer record is dropped once it is no
    /// longer in any context.
    pub fn remove(&self, context: &str, socket: &S) -> bool {
        let id = socket.id();
        let peer = {
            let mut contexts = self.lock();
            let removed = contexts
                .get_mut(context)
                .and_then(|sockets| {
                    let position = sockets.iter().position(|s| s.id() == id)?;
                    Some(sockets.remove(position))
                })
                .is_some();
            if !removed {
                return false;
            }
            let still_stashed = contexts
                .values()
                .any(|sockets| sockets.iter().any(|s| s.id() == id));
            if still_stashed {
                self.inner.peers.get(&id).map(|entry| *entry.value())
            } else {
                self.inner.peers.remove(&id).map(|(_, peer)| peer)
            }
        };
        tracing::warn!(
            kind = S::KIND,
            socket_id = %id,
            context,
            peer_addr = ?peer,
            "removing socket from stash"
        );

        if !socket.is_closed() {
            socket.close();
        }
        self.record_size();
        true
    }

    /// Remove `socket` from every context.
    pub fn remove_everywhere(&self, socket: &S) -> bool {
        let names = self.contexts();
        let mut removed = false;
        for name in names {
            removed |= self.remove(&name, socket);
        }
        removed
    }

    /// Snapshot of one context.
    pub fn sockets(&self, context: &str) -> Vec<S> {
        self.lock().get(context).cloned().unwrap_or_default()
    }

    /// Call `f` for every socket in `context`; sockets whose call fails are
    /// removed. Returns the number of successful calls.
    pub fn each<F>(&self, context: &str, mut f: F) -> usize
    where
        F: FnMut(&S) -> Result<(), SocketError>,
    {
        let mut delivered = 0;
        for socket in self.sockets(context) {
            match f(&socket) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::debug!(socket_id = %socket.id(), error = %err, "stashed socket failed");
                    self.remove(context, &socket);
                }
            }
        }
        delivered
    }

    /// Like [`each`](Self::each) across every context.
    pub fn all_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&str, &S) -> Result<(), SocketError>,
    {
        let snapshot: Vec<(String, Vec<S>)> = self
            .lock()
            .iter()
            .map(|(name, sockets)| (name.clone(), sockets.clone()))
            .collect();

        let mut delivered = 0;
        for (name, sockets) in snapshot {
            for socket in sockets {
                match f(&name, &socket) {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        tracing::debug!(socket_id = %socket.id(), error = %err, "stashed socket failed");
                        self.remove(&name, &socket);
                    }
                }
            }
        }
        delivered
    }

    /// Send `message` to every socket in `context`.
    pub fn broadcast(&self, context: &str, message: &str) -> usize {
        self.each(context, |socket| socket.send_text(message))
    }

    /// Remove every closed socket. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let closed: Vec<(String, S)> = self
            .lock()
            .iter()
            .flat_map(|(name, sockets)| {
                sockets
                    .iter()
                    .filter(|socket| socket.is_closed())
                    .map(move |socket| (name.clone(), socket.clone()))
            })
            .collect();

        closed
            .iter()
            .filter(|(name, socket)| self.remove(name, socket))
            .count()
    }

    /// Close and remove every socket.
    pub fn close_all(&self) {
        let all: Vec<(String, S)> = self
            .lock()
            .iter()
            .flat_map(|(name, sockets)| {
                sockets
                    .iter()
                    .map(move |socket| (name.clone(), socket.clone()))
            })
            .collect();
        for (name, socket) in all {
            self.remove(&name, &socket);
        }
    }

    /// Context names currently present.
    pub fn contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, context: &str) -> usize {
        self.lock().get(context).map_or(0, Vec::len)
    }

    /// Number of stash entries across all contexts.
    pub fn total_len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Recorded peer address of a stashed socket.
    pub fn peer_addr(&self, socket: &S) -> Option<SocketAddr> {
        self.inner.peers.get(&socket.id()).map(|entry| *entry.value())
    }
}

impl<S: StashSocket> fmt::Debug for ConnectionStash<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStash")
            .field("kind", &S::KIND)
            .field("contexts", &self.contexts())
            .field("sockets", &self.total_len())
            .finish()
    }
}

/// A stash narrowed to one context.
#[derive(Clone)]
pub struct StashContext<S> {
    stash: ConnectionStash<S>,
    name: String,
}

impl<S: StashSocket> StashContext<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, socket: S) {
        self.stash.add(&self.name, socket);
    }

    pub fn remove(&self, socket: &S) -> bool {
        self.stash.remove(&self.name, socket)
    }

    pub fn each<F>(&self, f: F) -> usize
    where
        F: FnMut(&S) -> Result<(), SocketError>,
    {
        self.stash.each(&self.name, f)
    }

    pub fn broadcast(&self, message: &str) -> usize {
        self.stash.broadcast(&self.name, message)
    }

    pub fn sockets(&self) -> Vec<S> {
        self.stash.sockets(&self.name)
    }

    pub fn len(&self) -> usize {
        self.stash.len(&self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::watch;

    #[derive(Clone)]
    struct FakeSocket {
        id: SocketId,
        broken: Arc<AtomicBool>,
        closes: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<watch::Sender<bool>>,
    }

    impl FakeSocket {
        fn new() -> Self {
            Self {
                id: SocketId::new(),
                broken: Arc::new(AtomicBool::new(false)),
                closes: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(watch::channel(false).0),
            }
        }

        fn broken() -> Self {
            let socket = Self::new();
            socket.broken.store(true, Ordering::SeqCst);
            socket
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl StashSocket for FakeSocket {
        const KIND: &'static str = "fake";

        fn id(&self) -> SocketId {
            self.id
        }

        fn peer_addr(&self) -> SocketAddr {
            "10.0.0.1:5000".parse().unwrap()
        }

        fn is_closed(&self) -> bool {
            *self.closed.borrow()
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.send_replace(true);
        }

        fn send_text(&self, message: &str) -> Result<(), SocketError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SocketError::Io("broken pipe".into()));
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            let mut rx = self.closed.subscribe();
            Box::pin(async move { crate::net::connection::wait_closed(&mut rx).await })
        }
    }

    #[test]
    fn broadcast_survives_a_broken_socket() {
        let stash = ConnectionStash::new();
        let a = FakeSocket::new();
        let b = FakeSocket::broken();
        let c = FakeSocket::new();
        stash.add("room", a.clone());
        stash.add("room", b.clone());
        stash.add("room", c.clone());

        assert_eq!(stash.broadcast("room", "hello"), 2);
        assert_eq!(a.sent(), vec!["hello"]);
        assert_eq!(c.sent(), vec!["hello"]);
        assert_eq!(stash.len("room"), 2);
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
        assert!(stash.peer_addr(&b).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let stash = ConnectionStash::new();
        let socket = FakeSocket::new();
        stash.push(socket.clone());
        assert_eq!(stash.peer_addr(&socket), Some("10.0.0.1:5000".parse().unwrap()));

        assert!(stash.remove(DEFAULT_CONTEXT, &socket));
        assert!(!stash.remove(DEFAULT_CONTEXT, &socket));
        assert_eq!(socket.closes.load(Ordering::SeqCst), 1);
        assert!(stash.is_empty());
    }

    #[test]
    fn context_is_created_on_first_access() {
        let stash: ConnectionStash<FakeSocket> = ConnectionStash::new();
        let room = stash.context("lobby");
        assert!(room.is_empty());
        assert_eq!(stash.contexts(), vec!["lobby".to_string()]);

        room.add(FakeSocket::new());
        assert_eq!(stash.len("lobby"), 1);
        assert_eq!(room.broadcast("x"), 1);
    }

    #[test]
    fn peer_record_survives_until_last_context() {
        let stash = ConnectionStash::new();
        let socket = FakeSocket::new();
        stash.add("a", socket.clone());
        stash.add("b", socket.clone());
        stash.add("b", socket.clone());
        assert_eq!(stash.total_len(), 2);

        assert!(stash.remove("a", &socket));
        assert!(stash.peer_addr(&socket).is_some());
        assert!(stash.remove("b", &socket));
        assert!(stash.peer_addr(&socket).is_none());
    }

    #[test]
    fn peer_records_do_not_outlive_racing_removes() {
        let stash = ConnectionStash::new();
        for _ in 0..200 {
            let socket = FakeSocket::new();
            let adder = {
                let (stash, socket) = (stash.clone(), socket.clone());
                std::thread::spawn(move || stash.add("room", socket))
            };
            let remover = {
                let (stash, socket) = (stash.clone(), socket.clone());
                std::thread::spawn(move || {
                    stash.remove("room", &socket);
                })
            };
            adder.join().unwrap();
            remover.join().unwrap();

            stash.remove("room", &socket);
            assert!(stash.peer_addr(&socket).is_none());
        }
        assert!(stash.is_empty());
    }

    #[test]
    fn remove_everywhere_clears_every_context() {
        let stash = ConnectionStash::new();
        let socket = FakeSocket::new();
        let other = FakeSocket::new();
        stash.add("a", socket.clone());
        stash.add("b", socket.clone());
        stash.add("b", other.clone());

        assert!(stash.remove_everywhere(&socket));
        assert_eq!(stash.len("a"), 0);
        assert_eq!(stash.len("b"), 1);
        assert!(stash.peer_addr(&socket).is_none());
        assert!(!stash.remove_everywhere(&socket));
    }

    #[test]
    fn all_each_removes_failures_per_context() {
        let stash = ConnectionStash::new();
        stash.add("one", FakeSocket::new());
        stash.add("two", FakeSocket::broken());
        let mut seen = Vec::new();
        let delivered = stash.all_each(|name, socket| {
            seen.push(name.to_string());
            socket.send_text("ping")
        });
        seen.sort();
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(delivered, 1);
        assert_eq!(stash.len("two"), 0);
    }

    #[test]
    fn sweep_and_close_all() {
        let stash = ConnectionStash::new();
        let open = FakeSocket::new();
        let dead = FakeSocket::new();
        stash.push(open.clone());
        stash.push(dead.clone());
        dead.closed.send_replace(true);

        assert_eq!(stash.sweep(), 1);
        assert_eq!(stash.len(DEFAULT_CONTEXT), 1);

        stash.close_all();
        assert!(stash.is_empty());
        assert!(open.is_closed());
    }

    #[tokio::test]
    async fn closed_sockets_are_reaped() {
        let stash = ConnectionStash::new();
        let socket = FakeSocket::new();
        stash.push(socket.clone());
        socket.closed.send_replace(true);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while stash.len(DEFAULT_CONTEXT) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
