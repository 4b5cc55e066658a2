//! Error classifier (C1): turns an opaque executor failure into an `ErrorKind`
//! plus any rate-limit hint it carries (spec §4.1).

use actioncore_types::{ErrorKind, RateLimitHint};
use std::collections::HashMap;

/// Everything the classifier is willing to look at on a failed executor call.
///
/// Executors report failures through this shape rather than a typed error so
/// the core stays decoupled from any one platform's error model -- it is the
/// failure-side analogue of the opaque `params` on `ActionRequest`.
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub is_rate_limit: bool,
    pub is_validation_error: bool,
    pub reset_at_ms: Option<i64>,
    pub retry_after_sec: Option<u64>,
    pub headers: HashMap<String, String>,
}

impl RawFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Classify a failure, applying spec §4.1's ordered rules (first match wins).
pub fn classify(failure: &RawFailure) -> ErrorKind {
    let msg = failure.message.as_str();

    if failure.status == Some(429)
        || contains_any(msg, &["rate limit", "too many requests"])
        || failure.is_rate_limit
    {
        return ErrorKind::RateLimit;
    }

    if matches!(failure.status, Some(401) | Some(403))
        || contains_any(
            msg,
            &["unauthorized", "authentication", "invalid token", "expired token"],
        )
    {
        return ErrorKind::Auth;
    }

    if matches!(failure.status, Some(400) | Some(422))
        || contains_any(msg, &["validation", "invalid", "required"])
        || failure.is_validation_error
    {
        return ErrorKind::Validation;
    }

    let network_codes = ["ECONNREFUSED", "ENOTFOUND", "ETIMEDOUT"];
    if contains_any(msg, &["network", "connect", "econnrefused", "enotfound", "etimedout"])
        || failure
            .code
            .as_deref()
            .is_some_and(|c| network_codes.contains(&c))
    {
        return ErrorKind::Network;
    }

    if contains_any(msg, &["timeout", "timed out"]) {
        return ErrorKind::Timeout;
    }

    if failure.status.is_some_and(|s| (500..600).contains(&s))
        || contains_any(msg, &["server error", "internal error"])
    {
        return ErrorKind::Api;
    }

    ErrorKind::Unknown
}

/// Extract rate-limit hints, preferring explicit fields over response headers
/// (spec §4.1).
pub fn extract_rate_limit(failure: &RawFailure) -> RateLimitHint {
    let mut hint = RateLimitHint {
        reset_at_ms: failure.reset_at_ms,
        retry_after_sec: failure.retry_after_sec,
        remaining: None,
        limit: None,
    };

    if hint.reset_at_ms.is_none() {
        if let Some(v) = failure.headers.get("X-RateLimit-Reset") {
            if let Ok(secs) = v.parse::<i64>() {
                hint.reset_at_ms = Some(secs * 1000);
            }
        }
    }
    if hint.retry_after_sec.is_none() {
        if let Some(v) = failure.headers.get("Retry-After") {
            if let Ok(secs) = v.parse::<u64>() {
                hint.retry_after_sec = Some(secs);
            }
        }
    }
    if let Some(v) = failure.headers.get("X-RateLimit-Remaining") {
        hint.remaining = v.parse().ok();
    }
    if let Some(v) = failure.headers.get("X-RateLimit-Limit") {
        hint.limit = v.parse().ok();
    }

    hint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_wins() {
        let failure = RawFailure::new("oops").with_status(429);
        assert_eq!(classify(&failure), ErrorKind::RateLimit);
    }

    #[test]
    fn rate_limit_message_match() {
        let failure = RawFailure::new("Too Many Requests, slow down");
        assert_eq!(classify(&failure), ErrorKind::RateLimit);
    }

    #[test]
    fn auth_status_and_message() {
        assert_eq!(
            classify(&RawFailure::new("nope").with_status(401)),
            ErrorKind::Auth
        );
        assert_eq!(
            classify(&RawFailure::new("token expired, please re-authenticate")),
            ErrorKind::Auth
        );
    }

    #[test]
    fn validation_before_network() {
        let failure = RawFailure::new("validation failed: name is required").with_status(422);
        assert_eq!(classify(&failure), ErrorKind::Validation);
    }

    #[test]
    fn network_error_codes() {
        let mut failure = RawFailure::new("connection refused by remote");
        assert_eq!(classify(&failure), ErrorKind::Network);
        failure.message = "something else".into();
        failure.code = Some("ETIMEDOUT".into());
        assert_eq!(classify(&failure), ErrorKind::Network);
    }

    #[test]
    fn timeout_distinct_from_network() {
        let failure = RawFailure::new("operation timed out waiting for response");
        assert_eq!(classify(&failure), ErrorKind::Timeout);
    }

    #[test]
    fn server_5xx_is_api() {
        let failure = RawFailure::new("boom").with_status(503);
        assert_eq!(classify(&failure), ErrorKind::Api);
    }

    #[test]
    fn unmatched_falls_back_to_unknown() {
        let failure = RawFailure::new("something bizarre happened");
        assert_eq!(classify(&failure), ErrorKind::Unknown);
    }

    #[test]
    fn rate_limit_extraction_prefers_explicit_fields_over_headers() {
        let failure = RawFailure::new("rate limited")
            .with_header("Retry-After", "30")
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Limit", "100");
        let hint = extract_rate_limit(&failure);
        assert_eq!(hint.retry_after_sec, Some(30));
        assert_eq!(hint.remaining, Some(0));
        assert_eq!(hint.limit, Some(100));
    }

    #[test]
    fn reset_header_converts_seconds_to_millis() {
        let failure = RawFailure::new("rate limited").with_header("X-RateLimit-Reset", "1700000000");
        let hint = extract_rate_limit(&failure);
        assert_eq!(hint.reset_at_ms, Some(1_700_000_000_000));
    }
}
