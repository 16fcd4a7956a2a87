//! Shutdown coordination.
//!
//! # Responsibilities
//! - Track the `running → draining → stopped` phase
//! - Hold the teardown hooks registered at startup
//! - Run hooks sequentially by `(order, registration)` with per-hook timeouts
//!
//! # Design Decisions
//! - `begin` is idempotent; only the first caller starts the shutdown
//! - A failing, panicking or hung hook is logged and never stops later hooks
//! - A timed-out hook is abandoned, not aborted

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tower::BoxError;
use tracing::{error, info, warn};

use crate::config::ShutdownConfig;
use crate::lifecycle::drain::RequestDrainTracker;
use crate::observability::metrics;

pub const DEFAULT_HOOK_ORDER: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPhase {
    Running,
    Draining,
    Stopped,
}

type HookRun = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A teardown step run once during shutdown.
pub struct ShutdownHook {
    pub name: String,
    pub order: i32,
    /// `None` uses the coordinator's default.
    pub timeout: Option<Duration>,
    run: HookRun,
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ShutdownHook {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            order: DEFAULT_HOOK_ORDER,
            timeout: None,
            run: Box::new(move || run().boxed()),
        }
    }

    /// Lower runs earlier.
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    Completed,
    Failed(String),
    Panicked,
    TimedOut,
}

impl HookResult {
    fn label(&self) -> &'static str {
        match self {
            HookResult::Completed => "completed",
            HookResult::Failed(_) => "failed",
            HookResult::Panicked => "panicked",
            HookResult::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub name: String,
    pub result: HookResult,
    pub elapsed: Duration,
}

/// Snapshot for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownState {
    pub state: ShutdownPhase,
    /// Unix milliseconds.
    pub started_at: Option<u64>,
    pub in_flight_requests: usize,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: watch::Sender<ShutdownPhase>,
    started_at: OnceLock<u64>,
    hooks: Mutex<Vec<ShutdownHook>>,
    hook_seq: AtomicU64,
    drain: RequestDrainTracker,
    default_hook_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(&ShutdownConfig::default())
    }
}

impl ShutdownCoordinator {
    pub fn new(config: &ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            phase,
            started_at: OnceLock::new(),
            hooks: Mutex::new(Vec::new()),
            hook_seq: AtomicU64::new(0),
            drain: RequestDrainTracker::new(),
            default_hook_timeout: Duration::from_millis(config.hook_timeout_ms),
        }
    }

    /// Append a hook. Returns `false` once shutdown has started.
    pub fn register_hook(&self, hook: ShutdownHook) -> bool {
        if self.phase() != ShutdownPhase::Running {
            warn!(hook = %hook.name, "Shutdown in progress, hook not registered");
            return false;
        }
        let seq = self.hook_seq.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(hook = %hook.name, order = hook.order, seq, "Registered shutdown hook");
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
        true
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn drain_tracker(&self) -> &RequestDrainTracker {
        &self.drain
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub fn is_draining(&self) -> bool {
        self.phase() == ShutdownPhase::Draining
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState {
            state: self.phase(),
            started_at: self.started_at.get().copied(),
            in_flight_requests: self.drain.in_flight(),
        }
    }

    /// Move from running to draining. Only the first call has an effect.
    pub fn begin(&self, reason: &str) -> bool {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                true
            } else {
                false
            }
        });
        if started {
            let _ = self.started_at.set(unix_millis());
            info!(
                reason,
                in_flight = self.drain.in_flight(),
                hooks = self.hook_count(),
                "Graceful shutdown started"
            );
        }
        started
    }

    /// Resolves once shutdown has begun.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase != ShutdownPhase::Running).await;
    }

    /// Run every registered hook once, in order.
    ///
    /// Hooks are consumed; a second call runs nothing.
    pub async fn run_hooks(&self) -> Vec<HookOutcome> {
        let mut hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        // Stable: registration order breaks ties.
        hooks.sort_by_key(|hook| hook.order);

        let mut outcomes = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let timeout = hook.timeout.unwrap_or(self.default_hook_timeout);
            let name = hook.name;
            let started = Instant::now();
            info!(hook = %name, order = hook.order, timeout_ms = timeout.as_millis() as u64, "Running shutdown hook");

            let handle = tokio::spawn((hook.run)());
            let result = match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(Ok(()))) => HookResult::Completed,
                Ok(Ok(Err(e))) => HookResult::Failed(e.to_string()),
                Ok(Err(join_error)) if join_error.is_panic() => HookResult::Panicked,
                Ok(Err(join_error)) => HookResult::Failed(join_error.to_string()),
                Err(_) => HookResult::TimedOut,
            };

            let elapsed = started.elapsed();
            match &result {
                HookResult::Completed => {
                    info!(hook = %name, elapsed_ms = elapsed.as_millis() as u64, "Shutdown hook completed")
                }
                HookResult::Failed(message) => {
                    error!(hook = %name, error = %message, "Shutdown hook failed")
                }
                HookResult::Panicked => error!(hook = %name, "Shutdown hook panicked"),
                HookResult::TimedOut => warn!(
                    hook = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown hook timed out, skipping"
                ),
            }
            metrics::record_shutdown_hook(&name, result.label());
            outcomes.push(HookOutcome {
                name,
                result,
                elapsed,
            });
        }
        outcomes
    }

    pub fn finish(&self) {
        self.phase.send_replace(ShutdownPhase::Stopped);
        info!("Shutdown complete");
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
