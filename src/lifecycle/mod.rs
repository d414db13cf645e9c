//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → stashes closed → connections drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → ServerHandle::terminate
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, close sockets, drain, exit
//! - Drain has a timeout; remaining connections are dropped after it

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
