//! Failure classification subsystem.
//!
//! # Data Flow
//! ```text
//! Error value (+ optional explicit status code)
//!     → source.rs (extract message and status via FailureSource)
//!     → patterns.rs (priority-ordered regex table, first match wins)
//!     → categorize.rs (CategorizationResult + extracted details)
//!     → report.rs (suggested action, operator-facing report)
//! ```
//!
//! # Design Decisions
//! - Closed category set; unknown input maps to `Unknown`, never an error
//! - Classification is pure and deterministic
//! - A pattern's `retryable` flag always agrees with the transient partition

pub mod categorize;
pub mod patterns;
pub mod report;
pub mod source;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use categorize::{categorize, CategorizationResult, Categorizer, ExtractedDetails};
pub use patterns::{FailurePattern, BUILTIN_PATTERNS};
pub use report::{get_failure_report, get_suggested_action, FailureReport, RecoveryAction, SuggestedAction};
pub use source::{ErrorChain, FailureSource};

/// Stable failure taxonomy shared by retry policy and operator reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RateLimit,
    Timeout,
    AuthExpired,
    PlatformBlocked,
    PolicyViolation,
    MediaError,
    NetworkError,
    DomainUnavailable,
    EconomicsFailed,
    Unknown,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 10] = [
        FailureCategory::RateLimit,
        FailureCategory::Timeout,
        FailureCategory::AuthExpired,
        FailureCategory::PlatformBlocked,
        FailureCategory::PolicyViolation,
        FailureCategory::MediaError,
        FailureCategory::NetworkError,
        FailureCategory::DomainUnavailable,
        FailureCategory::EconomicsFailed,
        FailureCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Timeout => "timeout",
            FailureCategory::AuthExpired => "auth_expired",
            FailureCategory::PlatformBlocked => "platform_blocked",
            FailureCategory::PolicyViolation => "policy_violation",
            FailureCategory::MediaError => "media_error",
            FailureCategory::NetworkError => "network_error",
            FailureCategory::DomainUnavailable => "domain_unavailable",
            FailureCategory::EconomicsFailed => "economics_failed",
            FailureCategory::Unknown => "unknown",
        }
    }

    /// Transient failures are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureCategory::RateLimit | FailureCategory::Timeout | FailureCategory::NetworkError
        )
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for FailureCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// How sure the matching pattern is about its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

pub fn is_transient_error(category: FailureCategory) -> bool {
    category.is_transient()
}

pub fn is_permanent_error(category: FailureCategory) -> bool {
    !category.is_transient()
}

pub fn is_valid_category(value: &str) -> bool {
    value.parse::<FailureCategory>().is_ok()
}
