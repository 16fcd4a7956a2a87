//! Breaker, HTTP retry and safe fetch composed for one named service.

use reqwest::Method;

use crate::config::RetryOverrides;
use crate::egress::{EgressClient, EgressRequest, FetchResponse};
use crate::error::Error;
use crate::resilience::{with_circuit_breaker, with_http_retry, CallOptions, CircuitBreakerRegistry};

/// Fetch `url` through the breaker for `service`, retrying transient failures.
///
/// 4xx and 5xx answers are failures here, so 429 and 5xx are retried and
/// every exhausted call counts against the breaker once.
pub async fn guarded_fetch(
    registry: &CircuitBreakerRegistry,
    client: &EgressClient,
    service: &str,
    retry: &RetryOverrides,
    url: &str,
    method: Method,
) -> Result<FetchResponse, Error> {
    with_circuit_breaker(registry, service, CallOptions::new(), || {
        with_http_retry(service, retry, || {
            let request = EgressRequest::new(method.clone());
            async move {
                let fetched = client.fetch_with_final_url(url, request).await?;
                Ok(fetched.error_for_status()?)
            }
        })
    })
    .await
}
