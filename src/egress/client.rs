//! SSRF-safe HTTP client.
//!
//! # Data Flow
//! ```text
//! fetch(url)
//!     → token bucket (RateLimitError when empty)
//!     → validate_url (scheme, credentials, denylist, policy, DNS + ranges)
//!     → request pinned to the validated addresses
//!     → 3xx + Location? check_redirect → validate again → next hop
//!     → response (or download body under the same deadline)
//! ```
//!
//! # Design Decisions
//! - Transport redirects are disabled; every hop is validated from scratch
//!   and credentials are dropped when a hop changes origin
//! - Each hop gets a client whose resolver only knows the validated
//!   addresses, so no second lookup can reach a different IP
//! - One deadline covers all hops; an external token can abort at any point

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    LOCATION, PROXY_AUTHORIZATION, WWW_AUTHENTICATE,
};
use reqwest::{Method, Response, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::EgressConfig;
use crate::egress::error::{EgressError, RateLimitError};
use crate::egress::resolver::{DnsResolver, SystemResolver};
use crate::egress::validate::{check_redirect, validate_parsed, validate_url, EgressPolicy, ValidatedTarget};
use crate::observability::metrics;
use crate::resilience::timeouts::run_with_deadline;
use crate::security::TokenBucket;

const MAX_PINNED_CLIENTS: usize = 256;

/// Credentials never forwarded to a different origin on redirect.
const CROSS_ORIGIN_STRIPPED: [HeaderName; 4] =
    [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE];

/// Per-call request options.
#[derive(Debug, Clone)]
pub struct EgressRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
    /// External cancellation, merged with the call's own deadline.
    pub cancel: Option<CancellationToken>,
}

impl Default for EgressRequest {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel: None,
        }
    }
}

impl EgressRequest {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A response together with the URL it was finally served from.
#[derive(Debug)]
pub struct FetchResponse {
    pub response: Response,
    pub final_url: Url,
}

impl FetchResponse {
    /// Turn a 4xx or 5xx answer into `EgressError::Status`.
    pub fn error_for_status(self) -> Result<Self, EgressError> {
        let status = self.response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(EgressError::Status {
                status: status.as_u16(),
                url: self.final_url.to_string(),
            });
        }
        Ok(self)
    }
}

struct ClientInner {
    policy: EgressPolicy,
    resolver: Arc<dyn DnsResolver>,
    bucket: Arc<TokenBucket>,
    timeout: Duration,
    max_redirects: u32,
    user_agent: String,
    max_download_bytes: u64,
    allowed_content_types: Vec<String>,
    /// Pinned transport clients keyed by host and validated addresses, so
    /// repeated calls reuse the connection pool and TLS setup.
    pinned: DashMap<PinnedResolver, reqwest::Client>,
}

/// Cheap to clone; clones share the policy, resolver and token bucket.
#[derive(Clone)]
pub struct EgressClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for EgressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressClient")
            .field("policy", &self.inner.policy)
            .field("resolver", &self.inner.resolver)
            .field("timeout", &self.inner.timeout)
            .field("max_redirects", &self.inner.max_redirects)
            .finish_non_exhaustive()
    }
}

pub struct EgressClientBuilder {
    config: EgressConfig,
    policy: Option<EgressPolicy>,
    resolver: Option<Arc<dyn DnsResolver>>,
    bucket: Option<Arc<TokenBucket>>,
}

impl EgressClientBuilder {
    pub fn policy(mut self, policy: EgressPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Share an existing bucket, e.g. between several clients.
    pub fn token_bucket(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn build(self) -> EgressClient {
        let config = self.config;
        let policy = self.policy.unwrap_or_else(|| EgressPolicy::from(&config));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver::new()) as Arc<dyn DnsResolver>);
        let bucket = self.bucket.unwrap_or_else(|| {
            Arc::new(TokenBucket::new(
                config.rate_limit_capacity,
                config.rate_limit_refill_per_sec,
            ))
        });

        EgressClient {
            inner: Arc::new(ClientInner {
                policy,
                resolver,
                bucket,
                timeout: config.timeout(),
                max_redirects: config.max_redirects,
                user_agent: config.user_agent,
                max_download_bytes: config.max_download_bytes,
                allowed_content_types: config.allowed_content_types,
                pinned: DashMap::new(),
            }),
        }
    }
}

impl EgressClient {
    pub fn builder(config: EgressConfig) -> EgressClientBuilder {
        EgressClientBuilder {
            config,
            policy: None,
            resolver: None,
            bucket: None,
        }
    }

    pub fn new(config: EgressConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn policy(&self) -> &EgressPolicy {
        &self.inner.policy
    }

    pub(crate) fn download_defaults(&self) -> (u64, &[String]) {
        (self.inner.max_download_bytes, &self.inner.allowed_content_types)
    }

    /// Validate `url` against this client's policy without sending anything.
    pub async fn validate(&self, url: &str) -> Result<ValidatedTarget, EgressError> {
        validate_url(url, &self.inner.policy, self.inner.resolver.as_ref()).await
    }

    pub async fn fetch(&self, url: &str, request: EgressRequest) -> Result<Response, EgressError> {
        self.fetch_with_final_url(url, request)
            .await
            .map(|fetched| fetched.response)
    }

    pub async fn fetch_with_final_url(
        &self,
        url: &str,
        request: EgressRequest,
    ) -> Result<FetchResponse, EgressError> {
        self.execute(url, request, |fetched, _| async move { Ok(fetched) })
            .await
    }

    /// Run one budgeted, deadline-bound call. `finish` consumes the final
    /// response inside the same deadline (used to stream bodies).
    pub(crate) async fn execute<T, F, Fut>(
        &self,
        url: &str,
        request: EgressRequest,
        finish: F,
    ) -> Result<T, EgressError>
    where
        F: FnOnce(FetchResponse, Duration) -> Fut,
        Fut: std::future::Future<Output = Result<T, EgressError>>,
    {
        if let Err(retry_after) = self.inner.bucket.try_acquire() {
            warn!(url, retry_after_ms = retry_after.as_millis() as u64, "Egress rate limit exceeded");
            metrics::record_rate_limited();
            metrics::record_egress("rate_limited");
            return Err(RateLimitError { retry_after }.into());
        }

        let timeout = request.timeout.unwrap_or(self.inner.timeout);
        let cancel = request
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let deadline = Instant::now() + timeout;

        let call = async {
            let fetched = self.follow(url, request, deadline, timeout).await?;
            finish(fetched, timeout).await
        };
        let result = match run_with_deadline(call, timeout, &cancel).await {
            Ok(result) => result,
            Err(interrupted) => Err(EgressError::from(interrupted)),
        };

        metrics::record_egress(match &result {
            Ok(_) => "ok",
            Err(EgressError::Ssrf(_)) => "blocked",
            Err(EgressError::Timeout(_)) => "timeout",
            Err(EgressError::Cancelled) => "cancelled",
            Err(_) => "error",
        });
        if let Err(e) = &result {
            debug!(url, error = %e, "Egress call failed");
        }
        result
    }

    async fn follow(
        &self,
        url: &str,
        request: EgressRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<FetchResponse, EgressError> {
        let EgressRequest {
            mut method,
            mut headers,
            mut body,
            ..
        } = request;

        let mut target = self.validate(url).await?;
        let mut redirects = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EgressError::Timeout(timeout));
            }

            let response = self
                .send_once(&target, &method, &headers, body.clone(), remaining, timeout)
                .await?;
            let status = response.status();

            let location = if status.is_redirection() {
                response.headers().get(LOCATION).cloned()
            } else {
                None
            };
            let Some(location) = location else {
                return Ok(FetchResponse {
                    response,
                    final_url: target.url,
                });
            };

            if redirects >= self.inner.max_redirects {
                warn!(
                    url = %target.url,
                    limit = self.inner.max_redirects,
                    "Redirect limit exceeded"
                );
                return Err(EgressError::TooManyRedirects {
                    limit: self.inner.max_redirects,
                });
            }
            redirects += 1;

            let location = location.to_str().map_err(|_| EgressError::InvalidRedirect {
                from: target.url.to_string(),
                reason: "Location header is not valid ASCII".to_string(),
            })?;
            let next = check_redirect(&target.url, location)?;

            if next.origin() != target.url.origin() {
                for name in CROSS_ORIGIN_STRIPPED {
                    headers.remove(name);
                }
            }

            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) && method != Method::HEAD
            {
                method = Method::GET;
                body = None;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }

            debug!(
                from = %target.url,
                to = %next,
                status = status.as_u16(),
                hop = redirects,
                "Following redirect"
            );
            target = validate_parsed(next, &self.inner.policy, self.inner.resolver.as_ref()).await?;
        }
    }

    fn pinned_client(&self, target: &ValidatedTarget) -> Result<reqwest::Client, EgressError> {
        let key = PinnedResolver::new(target);
        if let Some(client) = self.inner.pinned.get(&key) {
            return Ok(client.value().clone());
        }

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .user_agent(self.inner.user_agent.as_str())
            .dns_resolver(Arc::new(key.clone()))
            .build()?;

        if self.inner.pinned.len() >= MAX_PINNED_CLIENTS {
            self.inner.pinned.clear();
        }
        self.inner.pinned.insert(key, client.clone());
        Ok(client)
    }

    async fn send_once(
        &self,
        target: &ValidatedTarget,
        method: &Method,
        headers: &HeaderMap,
        body: Option<Bytes>,
        remaining: Duration,
        timeout: Duration,
    ) -> Result<Response, EgressError> {
        let client = self.pinned_client(target)?;

        let mut builder = client
            .request(method.clone(), target.url.clone())
            .headers(headers.clone())
            .timeout(remaining);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EgressError::Timeout(timeout)
            } else {
                EgressError::Transport(e)
            }
        })
    }
}

/// Resolver that only ever answers with addresses that already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PinnedResolver {
    host: String,
    addrs: Vec<SocketAddr>,
}

impl PinnedResolver {
    fn new(target: &ValidatedTarget) -> Self {
        let mut addrs: Vec<SocketAddr> = target
            .addrs
            .iter()
            .map(|ip: &IpAddr| SocketAddr::new(*ip, target.port))
            .collect();
        addrs.sort();
        Self {
            host: target.host.clone(),
            addrs,
        }
    }
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let requested = name.as_str().trim_end_matches('.').to_ascii_lowercase();
        let result: Result<Addrs, Box<dyn std::error::Error + Send + Sync>> = if requested == self.host {
            let addrs: Addrs = Box::new(self.addrs.clone().into_iter());
            Ok(addrs)
        } else {
            Err(format!("host '{requested}' was not validated for this request").into())
        };
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::resolver::StaticResolver;
    use crate::egress::error::{SsrfError, SsrfReason};

    fn client_with(capacity: u32) -> EgressClient {
        let config = EgressConfig {
            rate_limit_capacity: capacity,
            rate_limit_refill_per_sec: 0.5,
            ..EgressConfig::default()
        };
        EgressClient::builder(config)
            .resolver(Arc::new(StaticResolver::new()))
            .build()
    }

    #[tokio::test]
    async fn rejects_before_connecting() {
        let client = client_with(10);
        let err = client
            .fetch("http://169.254.169.254/latest/meta-data/", EgressRequest::get())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EgressError::Ssrf(SsrfError {
                reason: SsrfReason::DeniedHostname(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn token_bucket_gates_every_call() {
        let client = client_with(2);
        for _ in 0..2 {
            let err = client.fetch("http://10.0.0.1/", EgressRequest::get()).await.unwrap_err();
            assert!(err.is_ssrf());
        }
        let err = client.fetch("http://10.0.0.1/", EgressRequest::get()).await.unwrap_err();
        assert!(matches!(err, EgressError::RateLimited(RateLimitError { .. })));

        // Clones share the bucket.
        let clone = client.clone();
        assert!(matches!(
            clone.fetch("http://10.0.0.1/", EgressRequest::get()).await,
            Err(EgressError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn pinned_resolver_answers_only_for_validated_host() {
        let target = ValidatedTarget {
            url: Url::parse("https://example.com/").unwrap(),
            host: "example.com".into(),
            port: 443,
            addrs: vec!["93.184.216.34".parse().unwrap()],
            ip_literal: false,
        };
        let resolver = PinnedResolver::new(&target);

        let addrs: Vec<_> = resolver
            .resolve("Example.com.".parse().unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec!["93.184.216.34:443".parse::<SocketAddr>().unwrap()]);

        assert!(resolver.resolve("evil.example".parse().unwrap()).await.is_err());
    }

    #[test]
    fn request_builder_sets_fields() {
        let token = CancellationToken::new();
        let req = EgressRequest::new(Method::POST)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body("{}")
            .timeout(Duration::from_secs(2))
            .cancel_on(token);
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body.as_deref(), Some(&b"{}"[..]));
        assert_eq!(req.timeout, Some(Duration::from_secs(2)));
        assert!(req.cancel.is_some());
    }

    #[test]
    fn pinned_clients_are_reused_per_target() {
        let client = client_with(10);
        let target = |addr: &str| ValidatedTarget {
            url: Url::parse("https://example.com/").unwrap(),
            host: "example.com".into(),
            port: 443,
            addrs: vec![addr.parse().unwrap()],
            ip_literal: false,
        };

        client.pinned_client(&target("93.184.216.34")).unwrap();
        client.pinned_client(&target("93.184.216.34")).unwrap();
        assert_eq!(client.inner.pinned.len(), 1);

        client.pinned_client(&target("93.184.216.35")).unwrap();
        assert_eq!(client.inner.pinned.len(), 2);
    }
}
