//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → ShutdownCoordinator::begin (once)
//!
//! Shutdown (shutdown.rs, serve.rs):
//!     begin → stop accepting → drain in-flight (drain.rs) → hooks by order → stopped
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, run hooks
//! - Shutdown has timeout: forced exit after deadline
//! - Listener and headless shapes share the same coordinator

pub mod drain;
pub mod serve;
pub mod shutdown;
pub mod signals;

pub use drain::{RequestDrainTracker, RequestGuard};
pub use serve::{run_until_signal, serve_with_graceful_shutdown, track_requests, GracefulShutdownOptions};
pub use shutdown::{
    HookOutcome, HookResult, ShutdownCoordinator, ShutdownHook, ShutdownPhase, ShutdownState,
    DEFAULT_HOOK_ORDER,
};
pub use signals::install_signal_handlers;
