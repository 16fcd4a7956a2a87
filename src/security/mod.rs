//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → rate_limit.rs (process-wide token bucket)
//!     → ip_filter.rs (every resolved address checked against forbidden ranges)
//!     → egress client connects only to addresses that passed
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in caller-supplied URLs

pub mod ip_filter;
pub mod rate_limit;

pub use ip_filter::{check_ip, ForbiddenRange};
pub use rate_limit::TokenBucket;
