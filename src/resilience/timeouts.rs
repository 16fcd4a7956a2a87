//! Timeout enforcement and cooperative cancellation.
//!
//! # Responsibilities
//! - Cancellable sleep for retry backoff
//! - Run a future against a deadline and a cancellation token
//!
//! # Design Decisions
//! - Uses Tokio's timer and `CancellationToken`; every suspension point in
//!   the crate goes through this module
//! - Timeout errors are distinct from cancellation

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The operation was cancelled through its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Why a deadline-bounded operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("operation cancelled")]
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), Cancelled> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Cancelled),
                _ = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

/// Drive `fut` to completion unless the timeout elapses or `cancel` fires.
///
/// The future is dropped on interruption, which aborts any in-flight I/O it owns.
pub async fn run_with_deadline<F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| Interrupted::TimedOut(timeout)),
    }
}
