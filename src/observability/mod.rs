//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breaker, retry, egress and shutdown produce:
//!     → tracing events with structured fields (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
