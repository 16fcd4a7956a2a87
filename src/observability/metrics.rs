//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience and egress metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open, by service
//! - `circuit_breaker_transitions_total` (counter): by service, from, to
//! - `circuit_breaker_rejected_total` (counter): calls denied, by service
//! - `retry_attempts_total` (counter): scheduled retries, by label
//! - `egress_requests_total` (counter): by outcome
//! - `egress_ssrf_blocked_total` (counter): rejected destinations, by reason
//! - `egress_rate_limited_total` (counter)
//! - `shutdown_hooks_total` (counter): by hook, outcome
//!
//! # Design Decisions
//! - Metrics go through the `metrics` facade; without an installed recorder
//!   every call is a no-op, so library users pay nothing
//! - Labels stay low-cardinality (service names, fixed outcome strings)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_state(service: &str, state: f64) {
    metrics::gauge!("circuit_breaker_state", "service" => service.to_string()).set(state);
}

pub fn record_breaker_transition(service: &str, from: &'static str, to: &'static str) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejected(service: &str) {
    metrics::counter!("circuit_breaker_rejected_total", "service" => service.to_string()).increment(1);
}

pub fn record_retry(label: &str) {
    metrics::counter!("retry_attempts_total", "label" => label.to_string()).increment(1);
}

pub fn record_egress(outcome: &'static str) {
    metrics::counter!("egress_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_ssrf_blocked(reason: &'static str) {
    metrics::counter!("egress_ssrf_blocked_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited() {
    metrics::counter!("egress_rate_limited_total").increment(1);
}

pub fn record_shutdown_hook(hook: &str, outcome: &'static str) {
    metrics::counter!(
        "shutdown_hooks_total",
        "hook" => hook.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
