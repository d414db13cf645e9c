//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, request-id layer)
//!     → dispatcher.rs (classify, resolve route, buffer body)
//!     → responder.rs (filters, handler, content negotiation)
//!     → reply → hyper body (buffered, chunked or event stream)
//!
//! WebSocket upgrade
//!     → dispatcher.rs → websocket.rs (writer task + reader pump) → handler
//! ```

pub mod context;
pub mod dispatcher;
pub mod reply;
pub mod request;
mod responder;
pub mod server;
pub mod sse;
pub mod static_files;
pub mod stream;
pub mod websocket;

pub use context::{ContentKind, FileOptions, Phase, RequestContext};
pub use dispatcher::Dispatcher;
pub use reply::{halt, HandlerResult, Halt, Interrupt, Reply};
pub use request::{is_websocket_upgrade, Request, X_REQUEST_ID};
pub use server::{Server, ServerError, ServerHandle};
pub use sse::{sse_event, sse_message, EventSource, EventStream};
pub use static_files::{StaticFile, StaticFiles};
pub use stream::{ChunkStream, ChunkWriter, OnClose};
pub use websocket::{Frame, PongCallback, WebSocket};
