//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber once at startup
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Library code only emits events; installing a subscriber is the binary's job

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Build the filter used by [`init_logging`].
///
/// `RUST_LOG` wins when set and parseable; otherwise `level` applies.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (tests, embedding
/// applications), in which case the existing one is left in place.
pub fn init_logging(level: &str, json: bool) -> bool {
    let filter = build_filter(level);

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    }
}
