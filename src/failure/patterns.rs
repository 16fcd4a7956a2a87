//! Static failure pattern table.
//!
//! Patterns are matched against the lowercased failure message. Higher
//! `priority` wins; equal priorities keep declaration order.

use super::{Confidence, FailureCategory};

/// One row of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct FailurePattern {
    pub regex: &'static str,
    pub category: FailureCategory,
    pub confidence: Confidence,
    pub human_readable: &'static str,
    pub suggested_action: &'static str,
    pub retryable: bool,
    pub priority: u8,
}

pub const BUILTIN_PATTERNS: &[FailurePattern] = &[
    FailurePattern {
        regex: r"content policy|policy violation|violat(es|ed|ion|ing)\b|safety (system|filter)|content[ _-]filter|flagged (as|for)|community (guidelines|standards)",
        category: FailureCategory::PolicyViolation,
        confidence: Confidence::High,
        human_readable: "The request was rejected for violating a content or usage policy",
        suggested_action: "Review the generated content against the platform policy before resubmitting",
        retryable: false,
        priority: 95,
    },
    FailurePattern {
        regex: r"\b429\b|rate[ _-]?limit|too many requests|quota exceeded|throttl",
        category: FailureCategory::RateLimit,
        confidence: Confidence::High,
        human_readable: "The service is rate limiting requests",
        suggested_action: "Wait for the rate limit window to reset, then retry",
        retryable: true,
        priority: 90,
    },
    FailurePattern {
        regex: r"account (has been |was |is )?(suspended|banned|disabled|locked|restricted)|(ip|address|domain|app) (has been |was |is )?(blocked|banned|blacklisted)|blocked (by|until)|shadow ?ban",
        category: FailureCategory::PlatformBlocked,
        confidence: Confidence::High,
        human_readable: "The platform has blocked or suspended this account",
        suggested_action: "Check the account status on the platform and appeal if necessary",
        retryable: false,
        priority: 88,
    },
    FailurePattern {
        regex: r"\b401\b|unauthori[sz]ed|(token|session|credentials?|key) (has )?expired|expired (token|session|credentials?)|invalid (api[ _-]?key|token|credentials|grant)|authentication (failed|required)|refresh token",
        category: FailureCategory::AuthExpired,
        confidence: Confidence::High,
        human_readable: "Authentication credentials are invalid or expired",
        suggested_action: "Re-authenticate or rotate the API credentials",
        retryable: false,
        priority: 85,
    },
    FailurePattern {
        regex: r"\b403\b|forbidden|access denied|permission denied",
        category: FailureCategory::PlatformBlocked,
        confidence: Confidence::Medium,
        human_readable: "The platform refused access to this resource",
        suggested_action: "Verify the account has permission for this operation",
        retryable: false,
        priority: 75,
    },
    FailurePattern {
        regex: r"domain (is )?(not available|unavailable|already registered|taken)|already (registered|taken)|not available for registration|registry (rejected|unavailable)|premium domain|domain (does not exist|not found)",
        category: FailureCategory::DomainUnavailable,
        confidence: Confidence::High,
        human_readable: "The requested domain is not available",
        suggested_action: "Choose a different domain or check the registry status",
        retryable: false,
        priority: 80,
    },
    FailurePattern {
        regex: r"insufficient (funds|balance|credits?|quota)|payment (required|failed|declined)|\b402\b|billing (issue|error|hard limit)|credit (limit|balance)|exceeds? (the )?budget|budget exceeded|too expensive|price (exceeds|above)",
        category: FailureCategory::EconomicsFailed,
        confidence: Confidence::High,
        human_readable: "The operation failed for billing or budget reasons",
        suggested_action: "Top up the account balance or raise the configured budget",
        retryable: false,
        priority: 78,
    },
    FailurePattern {
        regex: r"unsupported (media|image|file|video|audio) (type|format)|invalid (image|media|video|audio)|(media|upload|image|video) (processing )?failed|file too large|payload too large|\b413\b|\b415\b|corrupt(ed)? (image|file|media)|could not (decode|process) (image|media|video)",
        category: FailureCategory::MediaError,
        confidence: Confidence::Medium,
        human_readable: "The media attached to the request could not be processed",
        suggested_action: "Check the media format and size limits, then re-upload",
        retryable: false,
        priority: 70,
    },
    FailurePattern {
        regex: r"timed? ?out|timeout|etimedout|deadline exceeded|\b408\b|\b504\b|gateway time-?out",
        category: FailureCategory::Timeout,
        confidence: Confidence::High,
        human_readable: "The request timed out",
        suggested_action: "Retry the request; increase the timeout if it keeps failing",
        retryable: true,
        priority: 60,
    },
    FailurePattern {
        regex: r"econnreset|econnrefused|enotfound|eai_again|ehostunreach|socket hang up|connection (reset|refused|closed|aborted|terminated)|network (error|unreachable|is unreachable)|dns (error|failure|lookup)|getaddrinfo|error sending request|\b50[023]\b|bad gateway|service unavailable|internal server error",
        category: FailureCategory::NetworkError,
        confidence: Confidence::Medium,
        human_readable: "A network or upstream server error occurred",
        suggested_action: "Retry shortly; check connectivity if the error persists",
        retryable: true,
        priority: 50,
    },
];
