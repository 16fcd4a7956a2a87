//! Resilience primitives for services that call out to third parties.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller
//!       │
//!       ▼
//!   ┌──────────────────────┐   ┌─────────────────────┐
//!   │ resilience           │   │ failure             │
//!   │ breaker registry     │──▶│ categorize errors   │
//!   │ retry + backoff      │   │ suggest recovery    │
//!   └─────────┬────────────┘   └─────────────────────┘
//!             │
//!             ▼
//!   ┌──────────────────────┐   ┌─────────────────────┐
//!   │ egress               │──▶│ security            │
//!   │ validate, pin DNS,   │   │ forbidden ranges    │
//!   │ redirects, download  │   │ token bucket        │
//!   └─────────┬────────────┘   └─────────────────────┘
//!             │
//!             ▼
//!        third party
//!
//!   lifecycle: signals → drain → ordered hooks → stopped
//!   config, observability, admin: cross-cutting
//! ```

pub mod admin;
pub mod config;
pub mod egress;
pub mod error;
pub mod failure;
pub mod guarded;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::ResilienceConfig;
pub use egress::{EgressClient, EgressError};
pub use error::{Error, Result};
pub use guarded::guarded_fetch;
pub use lifecycle::ShutdownCoordinator;
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry};
