//! Skein: an HTTP, WebSocket and server-sent events application server.
//!
//! Applications register routes, filters and mounts on an [`App`], build
//! it into an [`Application`] and serve it with a [`Server`]. Long-lived
//! sockets are kept in per-application stashes so other requests can
//! broadcast into them.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod params;
pub mod routing;
pub mod stash;
pub mod tasks;
pub mod templates;

pub use app::{App, AppState, Application};
pub use error::{Error, ErrorPayload, RequestError, Result};
pub use http::{
    halt, sse_event, sse_message, ChunkWriter, ContentKind, EventSource, FileOptions, Frame,
    HandlerResult, Halt, Interrupt, Reply, RequestContext, Server, ServerHandle, WebSocket,
};
pub use params::ParamsMap;
pub use routing::{handler_fn, PathPattern, RouteError};
pub use stash::{ConnectionStash, SseStash, StashSocket, WebSocketStash, DEFAULT_CONTEXT};
