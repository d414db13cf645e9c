//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Responder / dispatcher:
//!     → logging.rs (one access event per response)
//!     → metrics.rs (request counter)
//! Stash:
//!     → metrics.rs (socket gauge)
//!     → warn event on removal
//!
//! Consumers:
//!     → stdout via tracing-subscriber (RUST_LOG / configured level)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows in the `x-request-id` header, set by tower-http
//! - Metric names are fixed; labels carry method, status and socket kind

pub mod logging;
pub mod metrics;
