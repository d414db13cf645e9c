//! Connection acceptance and serving.
//!
//! # Responsibilities
//! - Accept TCP connections under the listener's connection limit
//! - Serve each connection with hyper (HTTP/1.1, HTTP/2, upgrades)
//! - Put the request-ID layer in front of the dispatcher
//! - Run the WebSocket keepalive sweeper
//! - Shut down in order: stop accepting, close stashed sockets, drain
//!
//! # Data Flow
//! ```text
//! Listener::accept → task per connection
//!     → hyper auto builder (with upgrades)
//!     → SetRequestId → PropagateRequestId → Dispatcher::dispatch
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use super::dispatcher::Dispatcher;
use crate::app::Application;
use crate::config::{AppConfig, ServerConfig};
use crate::lifecycle::{signals, Shutdown};
use crate::net::listener::ConnectionPermit;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::stash::{keepalive, SseStash, WebSocketStash};

/// Error type for server startup and the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cloneable handle that stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<Shutdown>,
}

impl ServerHandle {
    /// Stop accepting, close stashed sockets and drain connections.
    pub fn terminate(&self) {
        self.shutdown.trigger();
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

/// A bound application server.
pub struct Server {
    listener: Listener,
    dispatcher: Dispatcher,
    websockets: WebSocketStash,
    sses: SseStash,
    shutdown: Arc<Shutdown>,
    tracker: ConnectionTracker,
    ping_interval: Duration,
    drain_timeout: Duration,
}

impl Server {
    /// Bind the configured address for `app`.
    pub async fn bind(app: Application, config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = Listener::bind(&config.listener).await?;
        Ok(Self::from_listener(app, listener, &config.app))
    }

    /// Serve `app` on an already bound listener.
    pub fn from_listener(app: Application, listener: Listener, config: &AppConfig) -> Self {
        Self {
            listener,
            dispatcher: app.dispatcher().clone(),
            websockets: app.websockets().clone(),
            sses: app.sses().clone(),
            shutdown: Arc::new(Shutdown::new()),
            tracker: ConnectionTracker::new(),
            ping_interval: config.ping_interval(),
            drain_timeout: config.drain_timeout(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Accept connections until terminated.
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.local_addr()?;
        tracing::info!(address = %address, "server starting");

        let keepalive = keepalive::spawn(
            self.websockets.clone(),
            self.ping_interval,
            self.shutdown.subscribe(),
        );
        let mut shutdown = self.shutdown.subscribe();

        while !self.shutdown.is_triggered() {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "server stopping"
        );
        self.websockets.close_all();
        self.sses.close_all();

        if !self.tracker.drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "drain timeout elapsed, dropping connections"
            );
        }
        if let Err(err) = keepalive.await {
            tracing::warn!(error = %err, "keepalive task ended abnormally");
        }

        tracing::info!("server stopped");
        Ok(())
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully.
    pub async fn run_until_signal(self) -> Result<(), ServerError> {
        let handle = self.handle();
        tokio::spawn(async move {
            signals::wait_for_termination().await;
            handle.terminate();
        });
        self.run().await
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let dispatcher = self.dispatcher.clone();
        let guard = self.tracker.track();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;

            let service = ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .service(tower::service_fn(move |request: hyper::Request<Incoming>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let response = dispatcher.dispatch(request.map(Body::new), peer).await;
                        Ok::<_, Infallible>(response)
                    }
                }));

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(
                TokioIo::new(stream),
                TowerToHyperService::new(service),
            );
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            tracing::debug!(peer_addr = %peer, error = %err, "connection ended with error");
                        }
                        break;
                    }
                    _ = shutdown.recv(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("ping_interval", &self.ping_interval)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}
