//! Registry of per-service circuit breakers.
//!
//! # Responsibilities
//! - Hand out one shared breaker per service name
//! - Apply configured per-service overrides on first creation
//! - Snapshot every breaker for health dashboards
//!
//! # Design Decisions
//! - Caller-constructed and shared through `Arc`, no hidden globals
//! - DashMap entry API so concurrent first use creates a single breaker

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{CircuitBreakerConfig, CircuitBreakerSettings};
use crate::resilience::circuit_breaker::{
    CallOptions, CircuitBreaker, CircuitBreakerOpenError, CircuitBreakerStatus,
};

#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    settings: Arc<CircuitBreakerSettings>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.settings.defaults)
            .finish()
    }
}

impl CircuitBreakerRegistry {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            settings: Arc::new(settings),
        }
    }

    /// Shared breaker for `service`, created from configuration on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        let config = self.settings.for_service(service);
        self.get_with_config(service, config)
    }

    /// Shared breaker for `service`. `config` only applies when the breaker
    /// does not exist yet; later calls return the original instance.
    pub fn get_with_config(&self, service: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                tracing::debug!(service, ?config, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, config))
            })
            .clone()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.breakers.contains_key(service)
    }

    /// Snapshots of every breaker, sorted by service name.
    pub fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut statuses: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

/// Run `op` through the breaker registered for `service`.
pub async fn with_circuit_breaker<T, E, F, Fut>(
    registry: &CircuitBreakerRegistry,
    service: &str,
    options: CallOptions<T, E>,
    op: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<CircuitBreakerOpenError> + fmt::Display,
{
    let breaker = registry.get(service);
    breaker.call_with(options, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerOverrides;
    use crate::resilience::circuit_breaker::CircuitState;

    fn settings() -> CircuitBreakerSettings {
        let mut settings = CircuitBreakerSettings::default();
        settings.services.insert(
            "openai".into(),
            CircuitBreakerOverrides {
                failure_threshold: Some(1),
                ..Default::default()
            },
        );
        settings
    }

    #[test]
    fn same_name_shares_one_breaker() {
        let registry = CircuitBreakerRegistry::new(settings());
        let a = registry.get("cloudflare");
        let b = registry.get("cloudflare");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn overrides_apply_on_creation_only() {
        let registry = CircuitBreakerRegistry::new(settings());
        assert_eq!(registry.get("openai").config().failure_threshold, 1);
        assert_eq!(registry.get("namecheap").config().failure_threshold, 5);

        let later = registry.get_with_config(
            "openai",
            CircuitBreakerConfig {
                failure_threshold: 42,
                ..Default::default()
            },
        );
        assert_eq!(later.config().failure_threshold, 1);
    }

    #[test]
    fn registries_are_isolated() {
        let first = CircuitBreakerRegistry::default();
        let second = CircuitBreakerRegistry::default();
        first.get("openai").force_state(CircuitState::Open);
        assert_eq!(second.get("openai").state(), CircuitState::Closed);
    }

    #[test]
    fn statuses_are_sorted() {
        let registry = CircuitBreakerRegistry::default();
        registry.get("zeta");
        registry.get("alpha");
        registry.get("mid");
        let names: Vec<_> = registry
            .statuses()
            .into_iter()
            .map(|s| s.service_name)
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn helper_routes_through_named_breaker() {
        #[derive(Debug, PartialEq)]
        struct Denied;
        impl fmt::Display for Denied {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("denied")
            }
        }
        impl From<CircuitBreakerOpenError> for Denied {
            fn from(_: CircuitBreakerOpenError) -> Self {
                Denied
            }
        }

        let registry = CircuitBreakerRegistry::new(settings());
        let first = with_circuit_breaker(&registry, "openai", CallOptions::new(), || async {
            Err::<(), _>(Denied)
        })
        .await;
        assert_eq!(first, Err(Denied));
        assert_eq!(registry.get("openai").state(), CircuitState::Open);

        let fallback = with_circuit_breaker(
            &registry,
            "openai",
            CallOptions::new().fallback("cached"),
            || async { Ok::<_, Denied>("fresh") },
        )
        .await;
        assert_eq!(fallback, Ok("cached"));
    }
}
