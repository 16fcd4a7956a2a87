//! Egress error types.

use std::net::IpAddr;
use std::time::Duration;

use crate::failure::{ErrorChain, FailureSource};
use crate::resilience::timeouts::{Cancelled, Interrupted};
use crate::security::ForbiddenRange;

/// Why a destination was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SsrfReason {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("scheme '{0}' is not allowed")]
    UnsupportedScheme(String),
    #[error("URL must not embed credentials")]
    EmbeddedCredentials,
    #[error("URL has no host")]
    MissingHost,
    #[error("hostname '{0}' is denied")]
    DeniedHostname(String),
    #[error("hostname '{0}' is not in the allow-list")]
    HostNotAllowed(String),
    #[error("port {0} is not allowed")]
    PortNotAllowed(u16),
    #[error("address {addr} is in a forbidden range ({range})")]
    ForbiddenAddress { addr: IpAddr, range: ForbiddenRange },
    #[error("redirect from https to http is not allowed")]
    SchemeDowngrade,
}

impl SsrfReason {
    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SsrfReason::InvalidUrl(_) => "invalid_url",
            SsrfReason::UnsupportedScheme(_) => "scheme",
            SsrfReason::EmbeddedCredentials => "credentials",
            SsrfReason::MissingHost => "missing_host",
            SsrfReason::DeniedHostname(_) => "denied_hostname",
            SsrfReason::HostNotAllowed(_) => "host_not_allowed",
            SsrfReason::PortNotAllowed(_) => "port",
            SsrfReason::ForbiddenAddress { .. } => "forbidden_address",
            SsrfReason::SchemeDowngrade => "downgrade",
        }
    }
}

/// A destination was rejected before any connection was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("SSRF protection rejected {url}: {reason}")]
pub struct SsrfError {
    pub url: String,
    pub reason: SsrfReason,
}

impl SsrfError {
    pub fn new(url: impl Into<String>, reason: SsrfReason) -> Self {
        Self {
            url: url.into(),
            reason,
        }
    }
}

/// The process-wide egress budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("egress rate limit exceeded, next token in {retry_after:?}")]
pub struct RateLimitError {
    pub retry_after: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    #[error(transparent)]
    Ssrf(#[from] SsrfError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("DNS resolution failed for {host}: {message}")]
    Resolution { host: String, message: String },

    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },

    #[error("invalid redirect from {from}: {reason}")]
    InvalidRedirect { from: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("response of at least {size} bytes exceeds the {limit} byte limit")]
    ResponseTooLarge { size: u64, limit: u64 },

    #[error("content type {} is not allowed", .0.as_deref().unwrap_or("<missing>"))]
    UnsupportedContentType(Option<String>),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl EgressError {
    /// Whether the same request may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            EgressError::RateLimited(_) | EgressError::Timeout(_) | EgressError::Resolution { .. } => {
                true
            }
            EgressError::Status { status, .. } => *status == 429 || *status == 408 || *status >= 500,
            EgressError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub fn is_ssrf(&self) -> bool {
        matches!(self, EgressError::Ssrf(_))
    }
}

impl From<Cancelled> for EgressError {
    fn from(_: Cancelled) -> Self {
        EgressError::Cancelled
    }
}

impl From<Interrupted> for EgressError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(after) => EgressError::Timeout(after),
            Interrupted::Cancelled => EgressError::Cancelled,
        }
    }
}

impl FailureSource for EgressError {
    fn failure_message(&self) -> String {
        match self {
            EgressError::Transport(e) => ErrorChain(e).failure_message(),
            other => other.to_string(),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            EgressError::Status { status, .. } => Some(*status),
            EgressError::RateLimited(_) => Some(429),
            EgressError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{categorize, FailureCategory};

    #[test]
    fn ssrf_error_names_url_and_reason() {
        let err = SsrfError::new("http://127.0.0.1/", SsrfReason::DeniedHostname("127.0.0.1".into()));
        assert_eq!(
            err.to_string(),
            "SSRF protection rejected http://127.0.0.1/: hostname '127.0.0.1' is denied"
        );
    }

    #[test]
    fn classifies_through_categorizer() {
        let limited = EgressError::from(RateLimitError {
            retry_after: Duration::from_millis(100),
        });
        assert!(limited.is_transient());
        assert_eq!(categorize(&limited, None).category, FailureCategory::RateLimit);

        let timeout = EgressError::Timeout(Duration::from_secs(10));
        assert_eq!(categorize(&timeout, None).category, FailureCategory::Timeout);

        let status = EgressError::Status {
            status: 503,
            url: "https://api.example.com/".into(),
        };
        assert!(status.is_transient());
        assert_eq!(status.status_code(), Some(503));

        let blocked = EgressError::from(SsrfError::new("http://10.0.0.1/", SsrfReason::SchemeDowngrade));
        assert!(blocked.is_ssrf());
        assert!(!blocked.is_transient());
    }

    #[test]
    fn deadline_interruptions_map_to_variants() {
        assert!(matches!(
            EgressError::from(Interrupted::TimedOut(Duration::from_secs(1))),
            EgressError::Timeout(_)
        ));
        assert!(matches!(EgressError::from(Cancelled), EgressError::Cancelled));
    }
}
