//! Retry logic.
//!
//! # Responsibilities
//! - Run an async operation up to `max_retries + 1` times
//! - Sleep with exponential backoff (+ full jitter) between attempts
//! - Let a caller predicate veto further retries on any failure
//! - Honour a cancellation token before every attempt and during sleeps
//!
//! # Design Decisions
//! - The surfaced error is the last one observed, never an aggregate
//! - HTTP and DB presets ship with their own retryability signatures
//! - Presets accept `RetryOverrides` so configuration can tune them

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::RetryOverrides;
use crate::failure::{categorize, FailureSource};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::timeouts::{sleep_cancellable, Cancelled};

/// Decides whether the failure seen on a 1-based attempt may be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Observes a failure that is about to be retried: `(error, attempt, delay)`.
pub type RetryObserver<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

pub struct RetryOptions<E> {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub label: String,
    retry_on: Option<RetryPredicate<E>>,
    on_retry: Option<RetryObserver<E>>,
    cancel: Option<CancellationToken>,
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff,
            label: self.label.clone(),
            retry_on: self.retry_on.clone(),
            on_retry: self.on_retry.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("label", &self.label)
            .field("retry_on", &self.retry_on.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            label: "operation".to_string(),
            retry_on: None,
            on_retry: None,
            cancel: None,
        }
    }
}

impl<E> RetryOptions<E> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.backoff.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    pub fn retry_on<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Apply configured overrides on top of the current values.
    pub fn apply(mut self, overrides: &RetryOverrides) -> Self {
        if let Some(n) = overrides.max_retries {
            self.max_retries = n;
        }
        if let Some(ms) = overrides.base_delay_ms {
            self.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.max_delay_ms {
            self.backoff.max_delay = Duration::from_millis(ms);
        }
        if let Some(m) = overrides.multiplier {
            self.backoff.multiplier = m;
        }
        if let Some(j) = overrides.jitter {
            self.backoff.jitter = j;
        }
        self
    }
}

impl<E: FailureSource + 'static> RetryOptions<E> {
    /// Retry only failures the categorizer considers transient.
    pub fn retry_on_transient(self) -> Self {
        self.retry_on(|err: &E, _| categorize(err, None).retryable)
    }
}

/// Run `op` until it succeeds, the retry budget is spent, or a veto/cancel.
pub async fn with_retry<F, Fut, T, E>(options: &RetryOptions<E>, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            tracing::debug!(label = %options.label, attempt, "Retry loop cancelled before attempt");
            return Err(Cancelled.into());
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= options.max_retries {
            tracing::error!(
                label = %options.label,
                attempts = attempt + 1,
                error = %err,
                "Operation failed; retries exhausted"
            );
            return Err(err);
        }

        if let Some(predicate) = &options.retry_on {
            if !predicate(&err, attempt + 1) {
                tracing::debug!(
                    label = %options.label,
                    attempt = attempt + 1,
                    error = %err,
                    "Failure is not retryable"
                );
                return Err(err);
            }
        }

        let delay = options.backoff.delay_for_attempt(attempt);
        match &options.on_retry {
            Some(observer) => observer(&err, attempt + 1, delay),
            None => tracing::warn!(
                label = %options.label,
                attempt = attempt + 1,
                max_attempts = options.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Operation failed; retrying"
            ),
        }
        metrics::record_retry(&options.label);

        sleep_cancellable(delay, options.cancel.as_ref()).await?;
        attempt += 1;
    }
}

static HTTP_RETRY_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(429|50[0-4])\b|rate[ _-]?limit|too many requests|econnreset|connection (reset|refused|closed|aborted)|socket hang up|etimedout|timed? ?out|timeout|error sending request",
    )
    .expect("valid regex")
});

static DB_RETRY_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)econnreset|econnrefused|connection (reset|refused|closed|terminated|lost)|pool timed out|timed? ?out|timeout|could not connect|broken pipe",
    )
    .expect("valid regex")
});

/// 429 / 5xx status, or a connection-reset / timeout signature in the message.
pub fn is_retryable_http_failure<E: FailureSource + ?Sized>(err: &E) -> bool {
    match err.status_code() {
        Some(status) => status == 429 || status == 408 || (500..600).contains(&status),
        None => HTTP_RETRY_SIGNATURE.is_match(&err.failure_message()),
    }
}

/// Only connection and timeout signatures are worth retrying against a database.
pub fn is_retryable_db_failure<E: FailureSource + ?Sized>(err: &E) -> bool {
    DB_RETRY_SIGNATURE.is_match(&err.failure_message())
}

/// 3 retries, 2s base, 30s cap, HTTP signatures.
pub fn http_retry_options<E: FailureSource + 'static>(label: impl Into<String>) -> RetryOptions<E> {
    RetryOptions::new(label)
        .max_retries(3)
        .base_delay(Duration::from_secs(2))
        .max_delay(Duration::from_secs(30))
        .retry_on(|err: &E, _| is_retryable_http_failure(err))
}

/// 2 retries, 500ms base, 5s cap, connection/timeout signatures only.
pub fn db_retry_options<E: FailureSource + 'static>(label: impl Into<String>) -> RetryOptions<E> {
    RetryOptions::new(label)
        .max_retries(2)
        .base_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(5))
        .retry_on(|err: &E, _| is_retryable_db_failure(err))
}

pub async fn with_http_retry<F, Fut, T, E>(
    label: &str,
    overrides: &RetryOverrides,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + FailureSource + fmt::Display + 'static,
{
    let options = http_retry_options::<E>(label).apply(overrides);
    with_retry(&options, op).await
}

pub async fn with_db_retry<F, Fut, T, E>(
    label: &str,
    overrides: &RetryOverrides,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + FailureSource + fmt::Display + 'static,
{
    let options = db_retry_options::<E>(label).apply(overrides);
    with_retry(&options, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(String),
        Cancelled,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Failed(msg) => f.write_str(msg),
                TestError::Cancelled => f.write_str("cancelled"),
            }
        }
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    impl FailureSource for TestError {
        fn failure_message(&self) -> String {
            self.to_string()
        }
    }

    fn fast(max_retries: u32) -> RetryOptions<TestError> {
        RetryOptions::new("test")
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(50))
            .jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn retry_success_first_attempt() {
        let result = with_retry(&fast(3), || async { Ok::<_, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_makes_max_retries_plus_one_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = with_retry(&fast(4), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(TestError::Failed(format!("failure {n}"))) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // Last observed error, not the first.
        assert_eq!(result.unwrap_err(), TestError::Failed("failure 4".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn veto_on_first_failure_yields_single_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let options = fast(5).retry_on(|_, _| false);
        let result: Result<(), _> = with_retry(&options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Failed("fatal".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn veto_is_evaluated_on_every_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let options = fast(10).retry_on(|_, attempt| attempt < 3);
        let _: Result<(), _> = with_retry(&options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Failed("flaky".into())) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_fifth_attempt_with_doubling_sleeps() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&stamps);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::clone(&observed);

        let options = RetryOptions::new("e2e")
            .max_retries(5)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(10))
            .jitter(false)
            .on_retry(move |_: &TestError, attempt, delay| {
                observer.lock().unwrap().push((attempt, delay));
            });

        let result = with_retry(&options, move || {
            let mut stamps = recorder.lock().unwrap();
            stamps.push(Instant::now());
            let n = stamps.len();
            async move {
                if n < 5 {
                    Err(TestError::Failed("not yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 5);
        let stamps = stamps.lock().unwrap();
        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
            ]
        );
        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 4);
        assert_eq!(observed[0], (1, Duration::from_millis(10)));
        assert_eq!(observed[3], (4, Duration::from_millis(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_aborts_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = with_retry(&fast(3).cancel_on(token), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), TestError::Cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let token = CancellationToken::new();
        let options = fast(3).base_delay(Duration::from_secs(60)).max_delay(Duration::from_secs(60));
        let options = options.cancel_on(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> =
            with_retry(&options, || async { Err(TestError::Failed("down".into())) }).await;
        assert_eq!(result.unwrap_err(), TestError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_predicate_stops_on_permanent_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let options = fast(5).retry_on_transient();
        let result: Result<(), _> = with_retry(&options, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TestError::Failed("ETIMEDOUT".into()))
                } else {
                    Err(TestError::Failed("invalid api key".into()))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), TestError::Failed("invalid api key".into()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn http_signatures() {
        assert!(is_retryable_http_failure("upstream returned 503"));
        assert!(is_retryable_http_failure("read ECONNRESET"));
        assert!(is_retryable_http_failure("request timed out"));
        assert!(!is_retryable_http_failure("404 not found"));
        assert!(is_retryable_http_failure(&serde_json::json!({ "status": 429 })));
        assert!(!is_retryable_http_failure(&serde_json::json!({ "status": 400, "message": "timeout" })));
    }

    #[test]
    fn db_signatures_ignore_http_statuses() {
        assert!(is_retryable_db_failure("connection refused"));
        assert!(is_retryable_db_failure("pool timed out while waiting"));
        assert!(!is_retryable_db_failure("503 service unavailable"));
        assert!(!is_retryable_db_failure("unique constraint violated"));
    }

    #[tokio::test(start_paused = true)]
    async fn overrides_adjust_preset() {
        let overrides = RetryOverrides {
            max_retries: Some(1),
            base_delay_ms: Some(5),
            jitter: Some(false),
            ..Default::default()
        };
        let options = http_retry_options::<TestError>("preset").apply(&overrides);
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.backoff.base_delay, Duration::from_millis(5));
        assert_eq!(options.backoff.max_delay, Duration::from_secs(30));

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let _: Result<(), _> = with_http_retry("preset", &overrides, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Failed("502 bad gateway".into())) }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
