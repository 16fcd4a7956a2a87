//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0, ports valid)
//! - Check cross-field consistency (breaker success vs probe budget)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::{CircuitBreakerConfig, ResilienceConfig, RetryOverrides};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breaker("circuit_breaker", &config.circuit_breaker.defaults, &mut errors);
    for service in config.circuit_breaker.services.keys() {
        let effective = config.circuit_breaker.for_service(service);
        validate_breaker(&format!("circuit_breaker.services.{service}"), &effective, &mut errors);
    }

    validate_retry("retry.http", &config.retry.http, &mut errors);
    validate_retry("retry.db", &config.retry.db, &mut errors);

    let egress = &config.egress;
    if egress.timeout_ms == 0 {
        errors.push(ValidationError::new("egress.timeout_ms", "must be greater than 0"));
    }
    if egress.rate_limit_capacity == 0 {
        errors.push(ValidationError::new("egress.rate_limit_capacity", "must be greater than 0"));
    }
    if !(egress.rate_limit_refill_per_sec.is_finite() && egress.rate_limit_refill_per_sec > 0.0) {
        errors.push(ValidationError::new(
            "egress.rate_limit_refill_per_sec",
            "must be a positive number",
        ));
    }
    if egress.allowed_ports.is_empty() {
        errors.push(ValidationError::new("egress.allowed_ports", "must list at least one port"));
    }
    if egress.allowed_ports.contains(&0) {
        errors.push(ValidationError::new("egress.allowed_ports", "port 0 is not a valid destination"));
    }
    if egress.max_download_bytes == 0 {
        errors.push(ValidationError::new("egress.max_download_bytes", "must be greater than 0"));
    }
    if egress.allowed_content_types.iter().any(|t| t.trim().is_empty()) {
        errors.push(ValidationError::new(
            "egress.allowed_content_types",
            "entries must not be empty",
        ));
    }
    if egress
        .allowed_hosts
        .iter()
        .chain(egress.allowed_host_suffixes.iter())
        .any(|h| h.trim().trim_matches('.').is_empty())
    {
        errors.push(ValidationError::new("egress.allowed_hosts", "entries must not be empty"));
    }

    let shutdown = &config.shutdown;
    if shutdown.timeout_ms == 0 {
        errors.push(ValidationError::new("shutdown.timeout_ms", "must be greater than 0"));
    }
    if shutdown.hook_timeout_ms == 0 {
        errors.push(ValidationError::new("shutdown.hook_timeout_ms", "must be greater than 0"));
    }
    if shutdown.drain_timeout_ms > shutdown.timeout_ms {
        errors.push(ValidationError::new(
            "shutdown.drain_timeout_ms",
            "must not exceed shutdown.timeout_ms",
        ));
    }

    if config
        .admin
        .api_key
        .as_deref()
        .is_some_and(|key| key.trim().is_empty())
    {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{field}.failure_threshold"),
            "must be greater than 0",
        ));
    }
    if config.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{field}.reset_timeout_ms"),
            "must be greater than 0",
        ));
    }
    if config.half_open_max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{field}.half_open_max_attempts"),
            "must be greater than 0",
        ));
    }
    if config.success_threshold == 0 || config.success_threshold > config.half_open_max_attempts {
        errors.push(ValidationError::new(
            format!("{field}.success_threshold"),
            "must be between 1 and half_open_max_attempts",
        ));
    }
}

fn validate_retry(field: &str, overrides: &RetryOverrides, errors: &mut Vec<ValidationError>) {
    if let Some(m) = overrides.multiplier {
        if !(m.is_finite() && m >= 1.0) {
            errors.push(ValidationError::new(format!("{field}.multiplier"), "must be >= 1.0"));
        }
    }
    if let (Some(base), Some(max)) = (overrides.base_delay_ms, overrides.max_delay_ms) {
        if base > max {
            errors.push(ValidationError::new(
                format!("{field}.base_delay_ms"),
                "must not exceed max_delay_ms",
            ));
        }
    }
}
