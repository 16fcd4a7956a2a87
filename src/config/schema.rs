//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization
//! from config files, and every field has a default.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Breaker defaults and per-service overrides.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Overrides for the shipped retry presets.
    pub retry: RetrySettings,

    /// SSRF-safe egress client settings.
    pub egress: EgressConfig,

    /// Graceful shutdown timings.
    pub shutdown: ShutdownConfig,

    /// Admin endpoint access.
    pub admin: AdminConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Immutable per-breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures (net of success decay) that open a closed circuit.
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting probes, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Probe calls admitted while half-open.
    pub half_open_max_attempts: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_max_attempts: 3,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Return a copy with every `Some` field of `overrides` applied.
    pub fn with_overrides(mut self, overrides: &CircuitBreakerOverrides) -> Self {
        if let Some(v) = overrides.failure_threshold {
            self.failure_threshold = v;
        }
        if let Some(v) = overrides.reset_timeout_ms {
            self.reset_timeout_ms = v;
        }
        if let Some(v) = overrides.half_open_max_attempts {
            self.half_open_max_attempts = v;
        }
        if let Some(v) = overrides.success_threshold {
            self.success_threshold = v;
        }
        self
    }
}

/// Partial breaker configuration for a single service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_ms: Option<u64>,
    pub half_open_max_attempts: Option<u32>,
    pub success_threshold: Option<u32>,
}

/// Breaker defaults plus `[circuit_breaker.services.<name>]` tables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    #[serde(flatten)]
    pub defaults: CircuitBreakerConfig,

    pub services: HashMap<String, CircuitBreakerOverrides>,
}

impl CircuitBreakerSettings {
    /// Effective configuration for `service`.
    pub fn for_service(&self, service: &str) -> CircuitBreakerConfig {
        match self.services.get(service) {
            Some(overrides) => self.defaults.with_overrides(overrides),
            None => self.defaults,
        }
    }
}

/// Optional adjustments to a retry preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub http: RetryOverrides,
    pub db: RetryOverrides,
}

/// Egress client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Per-call timeout in milliseconds (covers every redirect hop).
    pub timeout_ms: u64,

    /// Redirect hops followed before giving up.
    pub max_redirects: u32,

    /// Exact hostnames allowed. Empty means no hostname restriction.
    pub allowed_hosts: Vec<String>,

    /// Hostname suffixes allowed (apex and subdomains).
    pub allowed_host_suffixes: Vec<String>,

    /// Destination ports allowed.
    pub allowed_ports: Vec<u16>,

    /// Addresses trusted even though they fall in a forbidden range.
    pub exempt_addresses: Vec<IpAddr>,

    /// Token bucket capacity for outbound calls.
    pub rate_limit_capacity: u32,

    /// Tokens added per second.
    pub rate_limit_refill_per_sec: f64,

    /// Byte ceiling for downloads.
    pub max_download_bytes: u64,

    /// Content-type prefixes accepted by downloads.
    pub allowed_content_types: Vec<String>,

    /// User-Agent sent on every request.
    pub user_agent: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_redirects: 3,
            allowed_hosts: Vec::new(),
            allowed_host_suffixes: Vec::new(),
            allowed_ports: vec![80, 443],
            exempt_addresses: Vec::new(),
            rate_limit_capacity: 50,
            rate_limit_refill_per_sec: 10.0,
            max_download_bytes: 10 * 1024 * 1024,
            allowed_content_types: vec!["image/".to_string()],
            user_agent: concat!("resilient-egress/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EgressConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Hard bound on listener close + drain + hooks, in milliseconds.
    pub timeout_ms: u64,

    /// Bound on waiting for in-flight requests, in milliseconds.
    pub drain_timeout_ms: u64,

    /// Default per-hook timeout, in milliseconds.
    pub hook_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            drain_timeout_ms: 10_000,
            hook_timeout_ms: 10_000,
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer key required on `/admin/*` routes. Unset means those routes
    /// refuse every request.
    pub api_key: Option<String>,
}
