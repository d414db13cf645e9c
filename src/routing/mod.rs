//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (route kind, path)
//!     → router.rs (mounts first, in registration order)
//!         → mount matched: re-resolve remainder in the mounted router
//!     → router.rs (own routes of that kind, insertion order)
//!     → matcher.rs (compiled path pattern, captures)
//!     → Return: RouteMatch { route, params, router } or no match
//!
//! Route Compilation (at startup):
//!     App builder calls
//!     → Compile patterns (literal fast path or anchored regex)
//!     → Validate mount prefixes
//!     → Freeze as immutable Arc<Router>
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Literal patterns compare strings, never touch the regex engine
//! - First match wins within a kind
//! - A matching mount never falls back to outer routes

pub mod filter;
pub mod matcher;
pub mod router;

pub use filter::{FilterChain, FilterScope};
pub use matcher::{IntoPattern, PathPattern};
pub use router::{handler_fn, Endpoint, Handler, Route, RouteKind, RouteMatch, Router, StreamHandler};

/// Errors raised while building a route table.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid mount `{prefix}`: {reason}")]
    InvalidMount { prefix: String, reason: &'static str },

    #[error("invalid header `{name}` on `{pattern}`")]
    InvalidHeader { pattern: String, name: String },

    #[error("task `{0}` is already registered")]
    DuplicateTask(String),
}
