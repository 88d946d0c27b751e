//! Rate limit response headers.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::SecondsFormat;

use crate::ratelimit::Decision;

/// The policy quota.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// End of the current window, ISO-8601 UTC.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Build the headers attached to both admitted and rejected responses.
///
/// `Retry-After` is the number of whole seconds until the window resets,
/// rounded up and never negative.
pub fn rate_limit_headers(decision: &Decision, now: u64) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset = decision
        .reset_at()
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATELIMIT_RESET, value);
    }

    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(decision, now)));
    headers
}

fn retry_after_secs(decision: &Decision, now: u64) -> u64 {
    let wait = decision.retry_after(now);
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}
