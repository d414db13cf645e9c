//! Network layer.
//!
//! # Data Flow
//! ```text
//! TcpListener (bounded by semaphore)
//!     → accept() → (TcpStream, peer, ConnectionPermit)
//!     → ConnectionTracker::track() for graceful drain
//!     → http::server serves the connection
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionTracker, SocketId};
pub use listener::{Listener, ListenerError};
