//! DNS resolution for destination validation.
//!
//! A and AAAA records are looked up independently. A host with records in only
//! one family resolves fine; a host with none is a resolution error.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

use crate::egress::error::EgressError;

/// Failure of a single record-family lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no records found")]
    NoRecords,
    #[error("{0}")]
    Failed(String),
}

impl From<ResolveError> for LookupError {
    fn from(e: ResolveError) -> Self {
        match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => LookupError::NoRecords,
            _ => LookupError::Failed(e.to_string()),
        }
    }
}

/// Resolves hostnames for the egress client.
#[async_trait]
pub trait DnsResolver: Send + Sync + fmt::Debug {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError>;

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<Ipv6Addr>, LookupError>;
}

/// Look up both families concurrently and merge the results, IPv4 first.
pub async fn resolve_host(resolver: &dyn DnsResolver, host: &str) -> Result<Vec<IpAddr>, EgressError> {
    let (v4, v6) = tokio::join!(resolver.lookup_ipv4(host), resolver.lookup_ipv6(host));

    let mut addrs = Vec::new();
    let mut failures = Vec::new();
    match v4 {
        Ok(found) => addrs.extend(found.into_iter().map(IpAddr::V4)),
        Err(LookupError::NoRecords) => {}
        Err(LookupError::Failed(msg)) => failures.push(format!("A: {msg}")),
    }
    match v6 {
        Ok(found) => addrs.extend(found.into_iter().map(IpAddr::V6)),
        Err(LookupError::NoRecords) => {}
        Err(LookupError::Failed(msg)) => failures.push(format!("AAAA: {msg}")),
    }

    if addrs.is_empty() {
        let message = if failures.is_empty() {
            "no A or AAAA records".to_string()
        } else {
            failures.join("; ")
        };
        return Err(EgressError::Resolution {
            host: host.to_string(),
            message,
        });
    }

    if !failures.is_empty() {
        tracing::debug!(host, failures = %failures.join("; "), "Partial DNS resolution");
    }
    Ok(addrs)
}

/// System resolver backed by trust-dns.
#[derive(Clone)]
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

impl SystemResolver {
    /// Use the host's resolver configuration, falling back to public defaults.
    pub fn new() -> Self {
        let inner = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                tracing::warn!(error = %e, "System DNS configuration unavailable, using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { inner }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        let lookup = self.inner.ipv4_lookup(host).await?;
        Ok(lookup.iter().map(|a| a.0).collect())
    }

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<Ipv6Addr>, LookupError> {
        let lookup = self.inner.ipv6_lookup(host).await?;
        Ok(lookup.iter().map(|aaaa| aaaa.0).collect())
    }
}

/// Fixed host table. Unknown hosts have no records.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    failing: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host<I>(mut self, host: &str, addrs: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.hosts
            .entry(host.to_ascii_lowercase())
            .or_default()
            .extend(addrs);
        self
    }

    /// Make every lookup for `host` fail with `message`.
    pub fn with_failure(mut self, host: &str, message: &str) -> Self {
        self.failing.insert(host.to_ascii_lowercase(), message.to_string());
        self
    }

    fn lookup(&self, host: &str) -> Result<&[IpAddr], LookupError> {
        let host = host.to_ascii_lowercase();
        if let Some(message) = self.failing.get(&host) {
            return Err(LookupError::Failed(message.clone()));
        }
        self.hosts
            .get(&host)
            .map(Vec::as_slice)
            .ok_or(LookupError::NoRecords)
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        let found: Vec<_> = self
            .lookup(host)?
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .collect();
        if found.is_empty() {
            Err(LookupError::NoRecords)
        } else {
            Ok(found)
        }
    }

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<Ipv6Addr>, LookupError> {
        let found: Vec<_> = self
            .lookup(host)?
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V6(v6) => Some(*v6),
                IpAddr::V4(_) => None,
            })
            .collect();
        if found.is_empty() {
            Err(LookupError::NoRecords)
        } else {
            Ok(found)
        }
    }
}
