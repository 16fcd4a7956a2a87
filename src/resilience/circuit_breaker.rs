//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (successes decay the count by one)
//! Open → Half-Open: first admission check after reset_timeout
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe failure, or every probe succeeded short of the threshold
//! ```
//!
//! # Design Decisions
//! - Per-service breaker (not global), owned by a registry
//! - Fail fast in Open state (no waiting for timeout)
//! - `decide` is a pure query; `try_acquire` is the single atomic
//!   decide-and-transition step, so half-open admission is a hard cap
//! - A probe whose future is dropped before reporting gives its slot back

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::failure::FailureSource;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the pure admission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Closed: the call runs normally.
    Allow,
    /// The call would be admitted as a half-open probe (entering half-open if open).
    Probe,
    /// The call would be rejected. `retry_in` is set while the reset timeout runs.
    Deny { retry_in: Option<Duration> },
}

/// Ticket returned by [`CircuitBreaker::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// Holds one half-open slot of the given half-open period.
    Probe { epoch: u64 },
}

/// Raised when the breaker denies a call and no fallback is configured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker for '{service_name}' is open")]
pub struct CircuitBreakerOpenError {
    pub service_name: String,
    pub retry_in: Option<Duration>,
}

impl CircuitBreakerOpenError {
    /// A denied call may succeed later without any change on the caller's side.
    pub fn is_transient(&self) -> bool {
        true
    }
}

impl FailureSource for CircuitBreakerOpenError {
    fn failure_message(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> Option<u16> {
        Some(503)
    }
}

/// Snapshot of a breaker for dashboards and health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_attempts: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Unix milliseconds.
    pub last_failure_time: Option<u64>,
    pub last_success_time: Option<u64>,
    pub opened_at: Option<u64>,
    /// Milliseconds until an open circuit starts admitting probes.
    pub retry_in_ms: Option<u64>,
    pub config: CircuitBreakerConfig,
}

/// Value substituted for the operation's result when the circuit denies a call.
pub enum Fallback<T> {
    Value(T),
    Lazy(Box<dyn FnOnce() -> T + Send>),
}

impl<T> Fallback<T> {
    fn resolve(self) -> T {
        match self {
            Fallback::Value(v) => v,
            Fallback::Lazy(f) => f(),
        }
    }
}

type OpenErrorFactory<E> = Box<dyn FnOnce(CircuitBreakerOpenError) -> E + Send>;

/// Per-call behaviour when the circuit denies the call.
pub struct CallOptions<T, E> {
    fallback: Option<Fallback<T>>,
    open_error: Option<OpenErrorFactory<E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self {
            fallback: None,
            open_error: None,
        }
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(Fallback::Value(value));
        self
    }

    pub fn fallback_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.fallback = Some(Fallback::Lazy(Box::new(f)));
        self
    }

    /// Build the error returned on denial instead of `E::from(CircuitBreakerOpenError)`.
    pub fn open_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(CircuitBreakerOpenError) -> E + Send + 'static,
    {
        self.open_error = Some(Box::new(f));
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_attempts: u32,
    /// Incremented on every entry to half-open.
    epoch: u64,
    opened_at: Option<Instant>,
    opened_at_wall: Option<u64>,
    last_failure_time: Option<u64>,
    last_success_time: Option<u64>,
    total_requests: u64,
    total_failures: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
            epoch: 0,
            opened_at: None,
            opened_at_wall: None,
            last_failure_time: None,
            last_success_time: None,
            total_requests: 0,
            total_failures: 0,
        }
    }
}

pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service_name", &self.service_name)
            .field("config", &self.config)
            .field("state", &self.lock().state)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();
        metrics::record_breaker_state(&service_name, CircuitState::Closed.gauge_value());
        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pure admission query: never transitions or consumes a probe slot.
    pub fn decide(&self, now: Instant) -> Decision {
        let inner = self.lock();
        self.decide_locked(&inner, now)
    }

    fn decide_locked(&self, inner: &BreakerInner, now: Instant) -> Decision {
        match inner.state {
            CircuitState::Closed => Decision::Allow,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                let reset = self.config.reset_timeout();
                if elapsed >= reset {
                    Decision::Probe
                } else {
                    Decision::Deny {
                        retry_in: Some(reset - elapsed),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    Decision::Probe
                } else {
                    Decision::Deny { retry_in: None }
                }
            }
        }
    }

    /// Decide and apply the result in one step.
    ///
    /// Moves an expired open circuit to half-open and reserves a probe slot;
    /// returns `None` when the call must be rejected.
    pub fn try_acquire(&self, now: Instant) -> Option<Admission> {
        let mut inner = self.lock();
        match self.decide_locked(&inner, now) {
            Decision::Allow => Some(Admission::Normal),
            Decision::Probe => {
                if inner.state == CircuitState::Open {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                }
                inner.half_open_attempts += 1;
                debug!(
                    service = %self.service_name,
                    attempt = inner.half_open_attempts,
                    max_attempts = self.config.half_open_max_attempts,
                    "Admitting half-open probe"
                );
                Some(Admission::Probe { epoch: inner.epoch })
            }
            Decision::Deny { .. } => None,
        }
    }

    /// Whether a call may proceed now. May move an expired open circuit to
    /// half-open, and counts as a probe while half-open.
    pub fn is_allowing_requests(&self) -> bool {
        self.try_acquire(Instant::now()).is_some()
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now());
    }

    pub fn record_success_at(&self, now: Instant) {
        self.apply_success(None, now);
    }

    /// Record the success of a call admitted by `try_acquire`.
    ///
    /// Outcomes of calls admitted under an earlier state are counted in the
    /// totals but do not move the state machine.
    pub fn record_admitted_success(&self, admission: Admission, now: Instant) {
        self.apply_success(Some(admission), now);
    }

    fn apply_success(&self, admission: Option<Admission>, now: Instant) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        inner.last_success_time = Some(unix_millis());

        if admission.is_some_and(|a| Self::is_stale(&inner, a)) {
            debug!(service = %self.service_name, state = %inner.state, "Ignoring stale success");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, now);
                } else if inner.half_open_attempts >= self.config.half_open_max_attempts
                    && inner.success_count >= inner.half_open_attempts
                {
                    warn!(
                        service = %self.service_name,
                        successes = inner.success_count,
                        success_threshold = self.config.success_threshold,
                        "Half-open probes exhausted without reaching success threshold"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: Option<&dyn fmt::Display>) {
        self.record_failure_at(error, Instant::now());
    }

    pub fn record_failure_at(&self, error: Option<&dyn fmt::Display>, now: Instant) {
        self.apply_failure(None, error, now);
    }

    /// Record the failure of a call admitted by `try_acquire`; see
    /// [`record_admitted_success`](Self::record_admitted_success).
    pub fn record_admitted_failure(
        &self,
        admission: Admission,
        error: Option<&dyn fmt::Display>,
        now: Instant,
    ) {
        self.apply_failure(Some(admission), error, now);
    }

    fn apply_failure(&self, admission: Option<Admission>, error: Option<&dyn fmt::Display>, now: Instant) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        inner.total_failures += 1;
        inner.last_failure_time = Some(unix_millis());

        if admission.is_some_and(|a| Self::is_stale(&inner, a)) {
            debug!(service = %self.service_name, state = %inner.state, "Ignoring stale failure");
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);

        let error = error.map(ToString::to_string);
        debug!(
            service = %self.service_name,
            state = %inner.state,
            failure_count = inner.failure_count,
            error = error.as_deref().unwrap_or("unknown"),
            "Recorded failure"
        );

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    /// A normal call finishing during half-open, or a probe from another
    /// half-open period, says nothing about the current state.
    fn is_stale(inner: &BreakerInner, admission: Admission) -> bool {
        match admission {
            Admission::Normal => inner.state == CircuitState::HalfOpen,
            Admission::Probe { epoch } => {
                inner.state != CircuitState::HalfOpen || inner.epoch != epoch
            }
        }
    }

    /// Give back a probe slot that never reported an outcome.
    fn release_probe(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.epoch == epoch {
            inner.half_open_attempts = inner.half_open_attempts.saturating_sub(1);
            debug!(service = %self.service_name, "Released abandoned half-open probe");
        }
    }

    /// Read-only snapshot. Never transitions, even when the reset timeout has elapsed.
    pub fn status(&self) -> CircuitBreakerStatus {
        let now = Instant::now();
        let inner = self.lock();
        let retry_in_ms = match self.decide_locked(&inner, now) {
            Decision::Deny {
                retry_in: Some(retry_in),
            } => Some(retry_in.as_millis() as u64),
            _ => None,
        };

        CircuitBreakerStatus {
            service_name: self.service_name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_attempts: inner.half_open_attempts,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            opened_at: inner.opened_at_wall,
            retry_in_ms,
            config: self.config,
        }
    }

    /// Operator override.
    pub fn force_state(&self, state: CircuitState) {
        let mut inner = self.lock();
        warn!(
            service = %self.service_name,
            from = %inner.state,
            to = %state,
            "Circuit state forced"
        );
        self.transition(&mut inner, state, Instant::now());
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_attempts = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.opened_at_wall = Some(unix_millis());
                inner.success_count = 0;
                inner.half_open_attempts = 0;
            }
            CircuitState::HalfOpen => {
                inner.epoch += 1;
                inner.success_count = 0;
                inner.half_open_attempts = 0;
            }
        }

        if from != to {
            match to {
                CircuitState::Open => warn!(
                    service = %self.service_name,
                    from = %from,
                    failure_count = inner.failure_count,
                    reset_timeout_ms = self.config.reset_timeout_ms,
                    "Circuit opened"
                ),
                _ => info!(
                    service = %self.service_name,
                    from = %from,
                    to = %to,
                    "Circuit state changed"
                ),
            }
            metrics::record_breaker_transition(&self.service_name, from.as_str(), to.as_str());
        }
        metrics::record_breaker_state(&self.service_name, to.gauge_value());
    }

    /// Run `op` through the breaker, converting a denial into `E`.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerOpenError> + fmt::Display,
    {
        self.call_with(CallOptions::default(), op).await
    }

    /// Run `op` through the breaker.
    ///
    /// On denial the fallback is returned if configured, otherwise the open
    /// error. The operation's own error is recorded and returned unchanged.
    pub async fn call_with<T, E, F, Fut>(&self, options: CallOptions<T, E>, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerOpenError> + fmt::Display,
    {
        let now = Instant::now();
        let admission = match self.try_acquire(now) {
            Some(admission) => admission,
            None => {
                metrics::record_breaker_rejected(&self.service_name);
                if let Some(fallback) = options.fallback {
                    debug!(service = %self.service_name, "Circuit open, using fallback");
                    return Ok(fallback.resolve());
                }
                let retry_in = match self.decide(now) {
                    Decision::Deny { retry_in } => retry_in,
                    _ => None,
                };
                let err = CircuitBreakerOpenError {
                    service_name: self.service_name.clone(),
                    retry_in,
                };
                debug!(service = %self.service_name, "Circuit open, rejecting call");
                return Err(match options.open_error {
                    Some(factory) => factory(err),
                    None => E::from(err),
                });
            }
        };

        let mut guard = ProbeGuard {
            breaker: self,
            epoch: match admission {
                Admission::Probe { epoch } => Some(epoch),
                Admission::Normal => None,
            },
        };

        let result = op().await;
        guard.epoch = None;

        let now = Instant::now();
        match &result {
            Ok(_) => self.record_admitted_success(admission, now),
            Err(e) => self.record_admitted_failure(admission, Some(e as &dyn fmt::Display), now),
        }
        result
    }
}

/// Returns an admitted probe's slot if the call future is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    epoch: Option<u64>,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            self.breaker.release_probe(epoch);
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
