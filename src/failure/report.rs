//! Suggested recovery actions and operator-facing failure reports.

use serde::Serialize;

use super::categorize::{categorize, CategorizationResult, ExtractedDetails};
use super::source::FailureSource;
use super::FailureCategory;

const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;
const DEFAULT_TRANSIENT_WAIT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    WaitAndRetry,
    Retry,
    Reauthenticate,
    ContactPlatform,
    ReviewContent,
    FixMedia,
    ChooseAnotherDomain,
    ReviewBudget,
    Investigate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedAction {
    pub action: RecoveryAction,
    pub description: String,
    pub can_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Map a category (and whatever details were extracted) to a recovery action.
pub fn get_suggested_action(
    category: FailureCategory,
    details: Option<&ExtractedDetails>,
) -> SuggestedAction {
    let retry_after = details.and_then(|d| d.retry_after_seconds);
    match category {
        FailureCategory::RateLimit => {
            let wait = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
            SuggestedAction {
                action: RecoveryAction::WaitAndRetry,
                description: format!("Rate limited; wait {wait}s before retrying"),
                can_retry: true,
                auto_retry: Some(true),
                retry_after_seconds: Some(wait),
            }
        }
        FailureCategory::Timeout => SuggestedAction {
            action: RecoveryAction::Retry,
            description: "Request timed out; retry with backoff".to_string(),
            can_retry: true,
            auto_retry: Some(true),
            retry_after_seconds: Some(retry_after.unwrap_or(DEFAULT_TRANSIENT_WAIT_SECS)),
        },
        FailureCategory::NetworkError => SuggestedAction {
            action: RecoveryAction::Retry,
            description: "Network error; retry shortly and check connectivity if it persists"
                .to_string(),
            can_retry: true,
            auto_retry: Some(true),
            retry_after_seconds: Some(retry_after.unwrap_or(DEFAULT_TRANSIENT_WAIT_SECS)),
        },
        FailureCategory::AuthExpired => SuggestedAction {
            action: RecoveryAction::Reauthenticate,
            description: "Credentials are invalid or expired; reconnect the account".to_string(),
            can_retry: false,
            auto_retry: None,
            retry_after_seconds: None,
        },
        FailureCategory::PlatformBlocked => {
            let description = match details.and_then(|d| d.blocked_until.as_deref()) {
                Some(until) => format!("Account is blocked until {until}; contact the platform"),
                None => "Account or resource is blocked; contact the platform".to_string(),
            };
            SuggestedAction {
                action: RecoveryAction::ContactPlatform,
                description,
                can_retry: false,
                auto_retry: None,
                retry_after_seconds: None,
            }
        }
        FailureCategory::PolicyViolation => {
            let description = match details.and_then(|d| d.violation_rule.as_deref()) {
                Some(rule) => format!("Content violated policy rule '{rule}'; revise and resubmit"),
                None => "Content violated a platform policy; revise and resubmit".to_string(),
            };
            SuggestedAction {
                action: RecoveryAction::ReviewContent,
                description,
                can_retry: false,
                auto_retry: None,
                retry_after_seconds: None,
            }
        }
        FailureCategory::MediaError => SuggestedAction {
            action: RecoveryAction::FixMedia,
            description: "Media could not be processed; check format and size".to_string(),
            can_retry: false,
            auto_retry: None,
            retry_after_seconds: None,
        },
        FailureCategory::DomainUnavailable => SuggestedAction {
            action: RecoveryAction::ChooseAnotherDomain,
            description: "Domain is not available; pick another candidate".to_string(),
            can_retry: false,
            auto_retry: None,
            retry_after_seconds: None,
        },
        FailureCategory::EconomicsFailed => SuggestedAction {
            action: RecoveryAction::ReviewBudget,
            description: "Operation exceeded budget or billing failed".to_string(),
            can_retry: false,
            auto_retry: None,
            retry_after_seconds: None,
        },
        FailureCategory::Unknown => SuggestedAction {
            action: RecoveryAction::Investigate,
            description: "Unrecognized failure; inspect logs".to_string(),
            can_retry: false,
            auto_retry: None,
            retry_after_seconds: None,
        },
    }
}

/// Everything an operator dashboard needs to present a failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub message: String,
    pub transient: bool,
    #[serde(flatten)]
    pub categorization: CategorizationResult,
    pub suggestion: SuggestedAction,
}

pub fn get_failure_report<S>(source: &S, status_code: Option<u16>) -> FailureReport
where
    S: FailureSource + ?Sized,
{
    let categorization = categorize(source, status_code);
    let suggestion = get_suggested_action(categorization.category, Some(&categorization.details));
    FailureReport {
        message: source.failure_message(),
        transient: categorization.category.is_transient(),
        categorization,
        suggestion,
    }
}
