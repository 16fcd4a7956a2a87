//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM/SIGINT handlers once per process
//! - Translate signals into `ShutdownCoordinator::begin`
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A repeated signal while draining is a logged no-op

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::lifecycle::shutdown::ShutdownCoordinator;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Spawn the signal listener. Returns `false` if one is already installed.
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::debug!("Signal handlers already installed");
        return false;
    }

    tokio::spawn(async move {
        let mut signals = Signals::new();
        loop {
            let name = signals.recv().await;
            if !coordinator.begin(name) {
                info!(signal = name, "Shutdown already in progress, ignoring signal");
            }
        }
    });
    true
}

struct Signals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl Signals {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    None
                }
            };
            Self { terminate }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            let terminate = async {
                match self.terminate.as_mut() {
                    Some(stream) => {
                        if stream.recv().await.is_none() {
                            std::future::pending::<()>().await;
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for SIGINT");
                        std::future::pending::<()>().await;
                    }
                    "SIGINT"
                }
                _ = terminate => "SIGTERM",
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            "ctrl-c"
        }
    }
}
