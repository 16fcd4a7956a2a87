//! Graceful shutdown for HTTP listeners and headless workers.
//!
//! # Data Flow
//! ```text
//! signal / begin()
//!     → stop accepting, reject new requests with 503
//!     → wait for in-flight requests (bounded by drain timeout)
//!     → run hooks in order
//!     → stopped
//! ```
//! The whole sequence runs under one hard timeout; exceeding it force-exits
//! the process with status 1.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::ShutdownConfig;
use crate::lifecycle::shutdown::ShutdownCoordinator;
use crate::lifecycle::signals::install_signal_handlers;

#[derive(Debug, Clone, Copy)]
pub struct GracefulShutdownOptions {
    /// Hard bound on listener close, drain and hooks together.
    pub shutdown_timeout: Duration,
    /// Bound on waiting for in-flight requests.
    pub drain_timeout: Duration,
    pub install_signal_handlers: bool,
    /// Exit the process with status 1 when `shutdown_timeout` elapses.
    pub exit_on_timeout: bool,
}

impl Default for GracefulShutdownOptions {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

impl From<&ShutdownConfig> for GracefulShutdownOptions {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            shutdown_timeout: Duration::from_millis(config.timeout_ms),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            install_signal_handlers: true,
            exit_on_timeout: true,
        }
    }
}

/// Counts every request for drain, and refuses new ones while draining.
pub async fn track_requests(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    if coordinator.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONNECTION, "close")],
            "Server is shutting down",
        )
            .into_response();
    }

    let _guard = coordinator.drain_tracker().begin();
    next.run(request).await
}

fn timed_out(options: &GracefulShutdownOptions) -> io::Error {
    error!(
        timeout_ms = options.shutdown_timeout.as_millis() as u64,
        "Graceful shutdown timed out"
    );
    if options.exit_on_timeout {
        std::process::exit(1);
    }
    io::Error::new(io::ErrorKind::TimedOut, "graceful shutdown timed out")
}

/// Serve `router` until shutdown begins, then drain and run hooks.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    coordinator: Arc<ShutdownCoordinator>,
    options: GracefulShutdownOptions,
) -> io::Result<()> {
    if options.install_signal_handlers {
        install_signal_handlers(coordinator.clone());
    }

    let addr = listener.local_addr()?;
    let app = router.layer(middleware::from_fn_with_state(coordinator.clone(), track_requests));
    let stop = {
        let coordinator = coordinator.clone();
        async move { coordinator.wait_for_shutdown().await }
    };
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app).with_graceful_shutdown(stop).await
    });
    info!(address = %addr, "HTTP server listening");

    tokio::select! {
        result = &mut server => {
            // Server stopped without a shutdown request.
            coordinator.begin("server exited");
            let outcome = result.map_err(io::Error::other).and_then(|r| r);
            if tokio::time::timeout(options.shutdown_timeout, coordinator.run_hooks())
                .await
                .is_err()
            {
                return Err(timed_out(&options));
            }
            coordinator.finish();
            return outcome;
        }
        _ = coordinator.wait_for_shutdown() => {}
    }

    let teardown = async {
        let drained = coordinator
            .drain_tracker()
            .wait_idle(options.drain_timeout)
            .await;
        if !drained {
            warn!(
                in_flight = coordinator.drain_tracker().in_flight(),
                drain_timeout_ms = options.drain_timeout.as_millis() as u64,
                "Requests still in flight after drain timeout"
            );
        }

        match tokio::time::timeout(options.drain_timeout, &mut server).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server stopped with error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
            Err(_) => {
                warn!("HTTP server did not stop in time, aborting connections");
                server.abort();
            }
        }

        coordinator.run_hooks().await;
    };

    match tokio::time::timeout(options.shutdown_timeout, teardown).await {
        Ok(()) => {
            coordinator.finish();
            Ok(())
        }
        Err(_) => Err(timed_out(&options)),
    }
}

/// Headless shape: wait for a signal (or `begin`), then run hooks only.
pub async fn run_until_signal(
    coordinator: Arc<ShutdownCoordinator>,
    options: GracefulShutdownOptions,
) -> io::Result<()> {
    if options.install_signal_handlers {
        install_signal_handlers(coordinator.clone());
    }

    coordinator.wait_for_shutdown().await;

    match tokio::time::timeout(options.shutdown_timeout, coordinator.run_hooks()).await {
        Ok(_) => {
            coordinator.finish();
            Ok(())
        }
        Err(_) => Err(timed_out(&options)),
    }
}
