//! Extraction of a message and status code from arbitrary failure values.

use std::error::Error as StdError;

use serde_json::Value;

/// Anything that can be classified by the categorizer.
pub trait FailureSource {
    /// Human-readable description of the failure.
    fn failure_message(&self) -> String;

    /// HTTP-style status code carried by the failure, if any.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl<T: FailureSource + ?Sized> FailureSource for &T {
    fn failure_message(&self) -> String {
        (**self).failure_message()
    }

    fn status_code(&self) -> Option<u16> {
        (**self).status_code()
    }
}

impl FailureSource for str {
    fn failure_message(&self) -> String {
        self.to_string()
    }
}

impl FailureSource for String {
    fn failure_message(&self) -> String {
        self.clone()
    }
}

impl FailureSource for Value {
    fn failure_message(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| {
                    map.get("error").and_then(|e| match e {
                        Value::String(s) => Some(s.as_str()),
                        Value::Object(inner) => inner.get("message").and_then(Value::as_str),
                        _ => None,
                    })
                })
                .map(str::to_string)
                .unwrap_or_else(|| self.to_string()),
            other => other.to_string(),
        }
    }

    fn status_code(&self) -> Option<u16> {
        let map = self.as_object()?;
        ["status", "statusCode", "status_code"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|v| match v {
                Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
    }
}

impl FailureSource for reqwest::Error {
    fn failure_message(&self) -> String {
        ErrorChain(self).failure_message()
    }

    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }
}

/// Adapter classifying any `std::error::Error` by its full `source()` chain.
pub struct ErrorChain<'a>(pub &'a (dyn StdError + 'static));

impl FailureSource for ErrorChain<'_> {
    fn failure_message(&self) -> String {
        let mut message = self.0.to_string();
        let mut current = self.0.source();
        while let Some(err) = current {
            let text = err.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            current = err.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_object_prefers_message_field() {
        let value = json!({ "message": "Too Many Requests", "status": 429 });
        assert_eq!(value.failure_message(), "Too Many Requests");
        assert_eq!(value.status_code(), Some(429));
    }

    #[test]
    fn json_object_reads_nested_error_and_status_code_alias() {
        let value = json!({ "error": { "message": "token expired" }, "statusCode": "401" });
        assert_eq!(value.failure_message(), "token expired");
        assert_eq!(value.status_code(), Some(401));
    }

    #[test]
    fn json_object_without_message_is_stringified() {
        let value = json!({ "code": "E_QUOTA" });
        assert_eq!(value.failure_message(), r#"{"code":"E_QUOTA"}"#);
        assert_eq!(value.status_code(), None);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn error_chain_walks_sources() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "connection reset"));
        assert_eq!(ErrorChain(&err).failure_message(), "request failed: connection reset");
    }
}
