//! Destination validation.
//!
//! # Responsibilities
//! - Parse and normalise the URL, reject unsupported schemes and credentials
//! - Apply the hostname denylist and the caller's host/port policy
//! - Resolve the host and check every address against forbidden ranges
//! - Validate redirect targets, rejecting https to http downgrades
//!
//! # Design Decisions
//! - The validated addresses are returned so the connection can be pinned to
//!   them; there is no second lookup between validation and connect
//! - Exempt addresses bypass the range filter only, never the denylist

use std::net::IpAddr;

use tracing::warn;
use url::{Host, Url};

use crate::config::EgressConfig;
use crate::egress::error::{EgressError, SsrfError, SsrfReason};
use crate::egress::resolver::{resolve_host, DnsResolver};
use crate::observability::metrics;
use crate::security::check_ip;

/// Hostnames that are never valid destinations, whatever they resolve to.
const DENIED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "127.0.0.1",
    "0.0.0.0",
    "[::1]",
    "[::]",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "instance-data.ec2.internal",
    "169.254.169.254",
    "[fd00:ec2::254]",
];

/// Caller policy applied on top of the built-in checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressPolicy {
    /// Exact hostnames allowed. Empty together with the suffix list means any host.
    pub allowed_hosts: Vec<String>,
    /// Suffixes allowed for the apex and any subdomain.
    pub allowed_host_suffixes: Vec<String>,
    pub allowed_ports: Vec<u16>,
    pub exempt_addresses: Vec<IpAddr>,
}

impl Default for EgressPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allowed_host_suffixes: Vec::new(),
            allowed_ports: vec![80, 443],
            exempt_addresses: Vec::new(),
        }
    }
}

impl From<&EgressConfig> for EgressPolicy {
    fn from(config: &EgressConfig) -> Self {
        Self {
            allowed_hosts: config.allowed_hosts.clone(),
            allowed_host_suffixes: config.allowed_host_suffixes.clone(),
            allowed_ports: config.allowed_ports.clone(),
            exempt_addresses: config.exempt_addresses.clone(),
        }
    }
}

impl EgressPolicy {
    pub fn allow_host(mut self, host: &str) -> Self {
        self.allowed_hosts.push(host.to_string());
        self
    }

    pub fn allow_host_suffix(mut self, suffix: &str) -> Self {
        self.allowed_host_suffixes.push(suffix.to_string());
        self
    }

    pub fn allow_port(mut self, port: u16) -> Self {
        if !self.allowed_ports.contains(&port) {
            self.allowed_ports.push(port);
        }
        self
    }

    pub fn exempt(mut self, addr: IpAddr) -> Self {
        self.exempt_addresses.push(addr);
        self
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() && self.allowed_host_suffixes.is_empty() {
            return true;
        }
        let exact = self
            .allowed_hosts
            .iter()
            .any(|allowed| normalize_host(allowed) == host);
        let suffix = self.allowed_host_suffixes.iter().any(|suffix| {
            let suffix = normalize_host(suffix.trim_start_matches('.'));
            host == suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        });
        exact || suffix
    }
}

/// A destination that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    pub url: Url,
    /// Normalised host (lowercase, no trailing dot, IPv6 bracketed).
    pub host: String,
    pub port: u16,
    /// Every address the host resolved to; all passed the range filter.
    pub addrs: Vec<IpAddr>,
    pub ip_literal: bool,
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn reject(url: &Url, reason: SsrfReason) -> EgressError {
    warn!(url = %url, reason = %reason, "Egress destination rejected");
    metrics::record_ssrf_blocked(reason.label());
    SsrfError::new(url.as_str(), reason).into()
}

/// Parse and validate `url` from scratch.
pub async fn validate_url(
    url: &str,
    policy: &EgressPolicy,
    resolver: &dyn DnsResolver,
) -> Result<ValidatedTarget, EgressError> {
    let parsed = Url::parse(url).map_err(|e| {
        metrics::record_ssrf_blocked("invalid_url");
        EgressError::from(SsrfError::new(url, SsrfReason::InvalidUrl(e.to_string())))
    })?;
    validate_parsed(parsed, policy, resolver).await
}

/// Validate an already parsed URL.
pub async fn validate_parsed(
    url: Url,
    policy: &EgressPolicy,
    resolver: &dyn DnsResolver,
) -> Result<ValidatedTarget, EgressError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            let scheme = other.to_string();
            return Err(reject(&url, SsrfReason::UnsupportedScheme(scheme)));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject(&url, SsrfReason::EmbeddedCredentials));
    }

    let (host, literal) = match url.host() {
        None => return Err(reject(&url, SsrfReason::MissingHost)),
        Some(Host::Domain(domain)) => (normalize_host(domain), None),
        Some(Host::Ipv4(v4)) => (v4.to_string(), Some(IpAddr::V4(v4))),
        Some(Host::Ipv6(v6)) => (format!("[{v6}]"), Some(IpAddr::V6(v6))),
    };

    if host.is_empty() {
        return Err(reject(&url, SsrfReason::MissingHost));
    }
    if DENIED_HOSTNAMES.contains(&host.as_str()) || host.ends_with(".localhost") {
        return Err(reject(&url, SsrfReason::DeniedHostname(host)));
    }

    let port = match url.port_or_known_default() {
        Some(port) => port,
        None => return Err(reject(&url, SsrfReason::MissingHost)),
    };
    if !policy.allowed_ports.contains(&port) {
        return Err(reject(&url, SsrfReason::PortNotAllowed(port)));
    }

    if !policy.host_allowed(&host) {
        return Err(reject(&url, SsrfReason::HostNotAllowed(host)));
    }

    let addrs = match literal {
        Some(ip) => vec![ip],
        None => resolve_host(resolver, &host).await?,
    };

    for addr in &addrs {
        if policy.exempt_addresses.contains(addr) {
            continue;
        }
        if let Err(range) = check_ip(*addr) {
            return Err(reject(&url, SsrfReason::ForbiddenAddress { addr: *addr, range }));
        }
    }

    Ok(ValidatedTarget {
        url,
        host,
        port,
        addrs,
        ip_literal: literal.is_some(),
    })
}

/// Resolve a `Location` header against the current URL.
///
/// Only the scheme transition is checked here; the target still needs full
/// validation before it is requested.
pub fn check_redirect(from: &Url, location: &str) -> Result<Url, EgressError> {
    let next = from.join(location).map_err(|e| EgressError::InvalidRedirect {
        from: from.to_string(),
        reason: format!("bad Location '{location}': {e}"),
    })?;

    if from.scheme() == "https" && next.scheme() == "http" {
        return Err(reject(&next, SsrfReason::SchemeDowngrade));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::resolver::StaticResolver;
    use crate::security::ForbiddenRange;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn resolver() -> StaticResolver {
        StaticResolver::new()
            .with_host("example.com", [ip("93.184.216.34"), ip("2606:2800:220:1::248")])
            .with_host("cdn.example.com", [ip("93.184.216.35")])
            .with_host("internal.example.net", [ip("10.0.0.5")])
            .with_host("mixed.example.net", [ip("93.184.216.36"), ip("192.168.1.1")])
            .with_host("relay.example.net", [ip("10.0.0.7")])
    }

    async fn reason(url: &str, policy: &EgressPolicy) -> SsrfReason {
        match validate_url(url, policy, &resolver()).await {
            Err(EgressError::Ssrf(e)) => e.reason,
            other => panic!("expected SSRF rejection for {url}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_loopback_metadata_and_private_literals() {
        let policy = EgressPolicy::default();
        assert!(matches!(reason("http://127.0.0.1/", &policy).await, SsrfReason::DeniedHostname(_)));
        assert!(matches!(
            reason("http://169.254.169.254/latest/meta-data", &policy).await,
            SsrfReason::DeniedHostname(_)
        ));
        assert!(matches!(reason("http://[::1]/", &policy).await, SsrfReason::DeniedHostname(_)));
        assert!(matches!(reason("http://LOCALHOST./", &policy).await, SsrfReason::DeniedHostname(_)));
        assert!(matches!(reason("http://app.localhost/", &policy).await, SsrfReason::DeniedHostname(_)));
        assert!(matches!(
            reason("http://metadata.google.internal/", &policy).await,
            SsrfReason::DeniedHostname(_)
        ));
        assert_eq!(
            reason("http://127.0.0.2/", &policy).await,
            SsrfReason::ForbiddenAddress {
                addr: ip("127.0.0.2"),
                range: ForbiddenRange::Loopback
            }
        );
        assert!(matches!(
            reason("http://2130706433/", &policy).await,
            SsrfReason::DeniedHostname(_)
        ));
        assert!(matches!(
            reason("http://[::ffff:10.0.0.1]/", &policy).await,
            SsrfReason::ForbiddenAddress { range: ForbiddenRange::Private, .. }
        ));
    }

    #[tokio::test]
    async fn rejects_scheme_and_credentials() {
        let policy = EgressPolicy::default();
        assert_eq!(
            reason("ftp://example.com/file", &policy).await,
            SsrfReason::UnsupportedScheme("ftp".into())
        );
        assert_eq!(
            reason("file:///etc/passwd", &policy).await,
            SsrfReason::UnsupportedScheme("file".into())
        );
        assert_eq!(
            reason("https://user:pw@example.com/", &policy).await,
            SsrfReason::EmbeddedCredentials
        );
        assert!(matches!(reason("not a url", &policy).await, SsrfReason::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn rejects_hosts_resolving_into_forbidden_ranges() {
        let policy = EgressPolicy::default();
        assert!(matches!(
            reason("https://internal.example.net/", &policy).await,
            SsrfReason::ForbiddenAddress { .. }
        ));
        // One bad record is enough.
        assert!(matches!(
            reason("https://mixed.example.net/", &policy).await,
            SsrfReason::ForbiddenAddress { .. }
        ));
    }

    #[tokio::test]
    async fn accepts_public_host_and_returns_pinned_addresses() {
        let target = validate_url("https://Example.com./path?q=1", &EgressPolicy::default(), &resolver())
            .await
            .unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.addrs.len(), 2);
        assert!(!target.ip_literal);
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_resolution_error() {
        let err = validate_url("https://nowhere.example/", &EgressPolicy::default(), &resolver())
            .await
            .unwrap_err();
        assert!(matches!(err, EgressError::Resolution { .. }));
    }

    #[tokio::test]
    async fn enforces_port_policy() {
        let policy = EgressPolicy::default();
        assert_eq!(
            reason("http://example.com:8080/", &policy).await,
            SsrfReason::PortNotAllowed(8080)
        );
        assert!(validate_url("http://example.com:8080/", &policy.allow_port(8080), &resolver())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn enforces_host_allow_lists() {
        let policy = EgressPolicy::default()
            .allow_host("cdn.example.com")
            .allow_host_suffix(".example.org");
        assert!(validate_url("https://cdn.example.com/", &policy, &resolver()).await.is_ok());
        assert_eq!(
            reason("https://example.com/", &policy).await,
            SsrfReason::HostNotAllowed("example.com".into())
        );

        let suffix = EgressPolicy::default().allow_host_suffix("example.com");
        assert!(validate_url("https://example.com/", &suffix, &resolver()).await.is_ok());
        assert!(validate_url("https://cdn.example.com/", &suffix, &resolver()).await.is_ok());
        assert!(matches!(
            reason("https://badexample.com/", &suffix).await,
            SsrfReason::HostNotAllowed(_)
        ));
    }

    #[tokio::test]
    async fn exemptions_bypass_ranges_but_not_denylist() {
        let policy = EgressPolicy::default()
            .exempt(ip("10.0.0.7"))
            .exempt(ip("127.0.0.1"));
        assert!(validate_url("https://relay.example.net/", &policy, &resolver()).await.is_ok());
        assert!(matches!(
            reason("http://127.0.0.1/", &policy).await,
            SsrfReason::DeniedHostname(_)
        ));
    }

    #[test]
    fn redirect_downgrade_is_rejected() {
        let from = Url::parse("https://example.com/a").unwrap();
        let err = check_redirect(&from, "http://example.com/b").unwrap_err();
        assert!(matches!(
            err,
            EgressError::Ssrf(SsrfError { reason: SsrfReason::SchemeDowngrade, .. })
        ));
    }

    #[test]
    fn relative_redirects_resolve_against_current_url() {
        let from = Url::parse("https://example.com/dir/a").unwrap();
        assert_eq!(
            check_redirect(&from, "b?x=1").unwrap().as_str(),
            "https://example.com/dir/b?x=1"
        );
        assert_eq!(
            check_redirect(&from, "//cdn.example.com/img").unwrap().as_str(),
            "https://cdn.example.com/img"
        );

        let plain = Url::parse("http://example.com/").unwrap();
        assert_eq!(
            check_redirect(&plain, "https://example.com/").unwrap().scheme(),
            "https"
        );
    }
}
