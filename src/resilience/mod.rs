//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream service:
//!     → registry.rs / circuit_breaker.rs (may the attempt start at all?)
//!     → retries.rs (how many attempts, which failures, what backoff)
//!     → backoff.rs (delay per attempt, full jitter)
//!     → timeouts.rs (cancellable sleeps and deadlines)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Combinators return the wrapped operation's own error unchanged
//! - Circuit breaker prevents cascading failures
//! - All resilience logic is composable around any async operation

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use backoff::{calculate_backoff, Backoff};
pub use circuit_breaker::{
    Admission, CallOptions, CircuitBreaker, CircuitBreakerOpenError, CircuitBreakerStatus,
    CircuitState, Decision, Fallback,
};
pub use registry::{with_circuit_breaker, CircuitBreakerRegistry};
pub use retries::{
    db_retry_options, http_retry_options, is_retryable_db_failure, is_retryable_http_failure,
    with_db_retry, with_http_retry, with_retry, RetryOptions,
};
pub use timeouts::{run_with_deadline, sleep_cancellable, Cancelled, Interrupted};
