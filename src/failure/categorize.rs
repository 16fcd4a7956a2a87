//! Pattern-based categorization of failures.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::patterns::{FailurePattern, BUILTIN_PATTERNS};
use super::source::FailureSource;
use super::{Confidence, FailureCategory};

/// Details pulled out of the failure message alongside the category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedDetails {
    pub violation_rule: Option<String>,
    pub retry_after_seconds: Option<u64>,
    pub blocked_until: Option<String>,
    pub error_code: Option<String>,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizationResult {
    pub category: FailureCategory,
    pub confidence: Confidence,
    pub human_readable: String,
    pub suggested_action: String,
    pub retryable: bool,
    pub details: ExtractedDetails,
}

struct CompiledPattern {
    regex: Regex,
    pattern: FailurePattern,
}

/// Classifier over a priority-ordered pattern table.
pub struct Categorizer {
    patterns: Vec<CompiledPattern>,
}

static DEFAULT_CATEGORIZER: Lazy<Categorizer> = Lazy::new(Categorizer::default);

static RETRY_AFTER_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry[-_ ]after\s*[:=]?\s*(\d+)").expect("valid regex"));
static RETRY_AFTER_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:minutes?|mins?)\b").expect("valid regex"));
static RETRY_AFTER_SECONDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:seconds?|secs?)\b").expect("valid regex"));
static VIOLATION_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:rule|policy)\s*[:=#]\s*["']?([a-z0-9_.\-]+)"#).expect("valid regex")
});
static VIOLATION_RULE_PROSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)violat\w*\s+(?:of\s+)?(?:the\s+)?["']?([a-z0-9_.\-]+)["']?\s+(?:rule|policy)"#)
        .expect("valid regex")
});
static BLOCKED_UNTIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:blocked|suspended|banned|restricted)\s+until\s*:?\s*(\d{4}-\d{2}-\d{2}(?:[t ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:z|[+-]\d{2}:?\d{2})?)?)",
    )
    .expect("valid regex")
});
static ERROR_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:error[_ ]?code|code)["']?\s*[:=]\s*["']?([a-z0-9_.\-]+)"#)
        .expect("valid regex")
});

impl Default for Categorizer {
    fn default() -> Self {
        Self::with_patterns(BUILTIN_PATTERNS.iter().copied())
    }
}

impl Categorizer {
    /// Build a categorizer from a custom table.
    ///
    /// Patterns whose regex fails to compile are skipped with a warning.
    pub fn with_patterns(patterns: impl IntoIterator<Item = FailurePattern>) -> Self {
        let mut compiled: Vec<CompiledPattern> = patterns
            .into_iter()
            .filter_map(|pattern| match Regex::new(pattern.regex) {
                Ok(regex) => Some(CompiledPattern { regex, pattern }),
                Err(e) => {
                    tracing::warn!(regex = pattern.regex, error = %e, "Skipping invalid failure pattern");
                    None
                }
            })
            .collect();
        // Stable sort keeps declaration order for equal priorities.
        compiled.sort_by(|a, b| b.pattern.priority.cmp(&a.pattern.priority));
        Self { patterns: compiled }
    }

    pub fn categorize<S>(&self, source: &S, status_code: Option<u16>) -> CategorizationResult
    where
        S: FailureSource + ?Sized,
    {
        let message = source.failure_message();
        let normalized = message.to_lowercase();
        let mut details = extract_details(&message);
        details.status_code = status_code.or_else(|| source.status_code());

        match self.patterns.iter().find(|p| p.regex.is_match(&normalized)) {
            Some(matched) => {
                let p = &matched.pattern;
                CategorizationResult {
                    category: p.category,
                    confidence: p.confidence,
                    human_readable: p.human_readable.to_string(),
                    suggested_action: p.suggested_action.to_string(),
                    retryable: p.retryable,
                    details,
                }
            }
            None => CategorizationResult {
                category: FailureCategory::Unknown,
                confidence: Confidence::Low,
                human_readable: "An unrecognized error occurred".to_string(),
                suggested_action: "Inspect the raw error message and logs".to_string(),
                retryable: false,
                details,
            },
        }
    }
}

/// Classify with the built-in pattern table.
pub fn categorize<S>(source: &S, status_code: Option<u16>) -> CategorizationResult
where
    S: FailureSource + ?Sized,
{
    DEFAULT_CATEGORIZER.categorize(source, status_code)
}

fn extract_details(message: &str) -> ExtractedDetails {
    ExtractedDetails {
        violation_rule: capture(&VIOLATION_RULE, message)
            .or_else(|| capture(&VIOLATION_RULE_PROSE, message)),
        retry_after_seconds: extract_retry_after(message),
        blocked_until: capture(&BLOCKED_UNTIL, message),
        error_code: capture(&ERROR_CODE, message),
        status_code: None,
    }
}

/// Explicit header form first, then minutes, then seconds.
fn extract_retry_after(message: &str) -> Option<u64> {
    if let Some(secs) = capture(&RETRY_AFTER_HEADER, message).and_then(|s| s.parse().ok()) {
        return Some(secs);
    }
    if let Some(mins) = capture(&RETRY_AFTER_MINUTES, message).and_then(|s| s.parse::<u64>().ok()) {
        return Some(mins.saturating_mul(60));
    }
    capture(&RETRY_AFTER_SECONDS, message).and_then(|s| s.parse().ok())
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rate_limit_message_is_transient() {
        let result = categorize("429 Too Many Requests", None);
        assert_eq!(result.category, FailureCategory::RateLimit);
        assert!(result.retryable);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn classification_is_case_insensitive() {
        let result = categorize("ECONNRESET while contacting upstream", None);
        assert_eq!(result.category, FailureCategory::NetworkError);
    }

    #[test]
    fn higher_priority_category_wins_when_two_match() {
        // Matches both rate_limit (90) and timeout (60).
        let result = categorize("rate limit hit, request timed out", None);
        assert_eq!(result.category, FailureCategory::RateLimit);
        // Matches both policy_violation (95) and auth_expired (85).
        let result = categorize("Unauthorized: content policy violation", None);
        assert_eq!(result.category, FailureCategory::PolicyViolation);
    }

    #[test]
    fn ties_resolve_by_declaration_order() {
        let first = FailurePattern {
            regex: "boom",
            category: FailureCategory::MediaError,
            confidence: Confidence::Low,
            human_readable: "first",
            suggested_action: "",
            retryable: false,
            priority: 10,
        };
        let second = FailurePattern {
            category: FailureCategory::DomainUnavailable,
            human_readable: "second",
            ..first
        };
        let categorizer = Categorizer::with_patterns([first, second]);
        assert_eq!(
            categorizer.categorize("boom", None).category,
            FailureCategory::MediaError
        );
        let categorizer = Categorizer::with_patterns([second, first]);
        assert_eq!(
            categorizer.categorize("boom", None).category,
            FailureCategory::DomainUnavailable
        );
    }

    #[test]
    fn unmatched_message_is_unknown_and_not_retryable() {
        let result = categorize("something odd happened", None);
        assert_eq!(result.category, FailureCategory::Unknown);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(!result.retryable);
    }

    #[test]
    fn categorize_is_deterministic() {
        let a = categorize("Gateway Timeout retry-after: 30", Some(504));
        let b = categorize("Gateway Timeout retry-after: 30", Some(504));
        assert_eq!(a, b);
    }

    #[test]
    fn explicit_status_overrides_error_field() {
        let err = json!({ "message": "nope", "status": 500 });
        assert_eq!(categorize(&err, Some(418)).details.status_code, Some(418));
        assert_eq!(categorize(&err, None).details.status_code, Some(500));
    }

    #[test]
    fn retry_after_forms_in_priority_order() {
        let d = categorize("Retry-After: 12, or wait 5 minutes", None).details;
        assert_eq!(d.retry_after_seconds, Some(12));
        let d = categorize("rate limited, try again in 2 minutes or 30 seconds", None).details;
        assert_eq!(d.retry_after_seconds, Some(120));
        let d = categorize("slow down for 45 seconds", None).details;
        assert_eq!(d.retry_after_seconds, Some(45));
        let d = categorize("rate limited", None).details;
        assert_eq!(d.retry_after_seconds, None);
    }

    #[test]
    fn extracts_violation_rule_block_date_and_code() {
        let d = categorize(
            "Content policy violation (rule: adult-content), code=POLICY_42",
            None,
        )
        .details;
        assert_eq!(d.violation_rule.as_deref(), Some("adult-content"));
        assert_eq!(d.error_code.as_deref(), Some("POLICY_42"));

        let d = categorize("Account suspended until 2026-11-01T12:00:00Z", None).details;
        assert_eq!(d.blocked_until.as_deref(), Some("2026-11-01T12:00:00Z"));
    }

    #[test]
    fn domain_and_economics_categories() {
        assert_eq!(
            categorize("example.com is already registered", None).category,
            FailureCategory::DomainUnavailable
        );
        assert_eq!(
            categorize("Insufficient funds in reseller account", None).category,
            FailureCategory::EconomicsFailed
        );
        assert_eq!(
            categorize("Unsupported media type image/bmp", None).category,
            FailureCategory::MediaError
        );
    }
}
