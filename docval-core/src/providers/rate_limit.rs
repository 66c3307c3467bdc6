//! Vendor rate-limit tracking

use crate::providers::error::{BackendError, BackendResult};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Rate-limit state reported by a vendor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// Requests limit per window
    pub requests_limit: Option<u32>,

    /// Tokens limit per window
    pub tokens_limit: Option<u32>,

    /// Requests remaining in current window
    pub requests_remaining: Option<u32>,

    /// Tokens remaining in current window
    pub tokens_remaining: Option<u32>,

    /// When the current window resets
    pub reset_at: Option<DateTime<Utc>>,
}

/// Tracks rate-limit headers for one backend
#[derive(Debug, Clone, Default)]
pub struct RateLimitTracker {
    info: Arc<Mutex<RateLimitInfo>>,
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Parse a reset hint: unix seconds, or a relative duration like `6m0s`, `1.5s`, `250ms`
///
/// Negative or out-of-range values yield `None`.
fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(timestamp) = value.parse::<i64>() {
        if timestamp < 0 {
            return None;
        }
        // Small integers are relative seconds, large ones are epoch timestamps
        if timestamp < 1_000_000_000 {
            let offset = chrono::Duration::try_seconds(timestamp)?;
            return now.checked_add_signed(offset);
        }
        return DateTime::from_timestamp(timestamp, 0);
    }

    let mut total_ms = 0f64;
    let mut number = String::new();
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let amount: f64 = number.parse().ok()?;
        number.clear();
        let unit_ms = match ch {
            'h' => 3_600_000.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1.0
            }
            'm' => 60_000.0,
            's' => 1_000.0,
            _ => return None,
        };
        total_ms += amount * unit_ms;
    }
    if !number.is_empty() || !total_ms.is_finite() || total_ms >= i64::MAX as f64 {
        return None;
    }
    let offset = chrono::Duration::try_milliseconds(total_ms as i64)?;
    now.checked_add_signed(offset)
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update rate-limit information from response headers
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let reset = headers
            .get("x-ratelimit-reset-requests")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_reset(v, Utc::now()));
        let mut info = self.info.lock().expect("rate limit lock poisoned");

        if let Some(limit) = header_u32(headers, "x-ratelimit-limit-requests") {
            info.requests_limit = Some(limit);
        }
        if let Some(remaining) = header_u32(headers, "x-ratelimit-remaining-requests") {
            info.requests_remaining = Some(remaining);
        }
        if let Some(limit) = header_u32(headers, "x-ratelimit-limit-tokens") {
            info.tokens_limit = Some(limit);
        }
        if let Some(remaining) = header_u32(headers, "x-ratelimit-remaining-tokens") {
            info.tokens_remaining = Some(remaining);
        }
        if reset.is_some() {
            info.reset_at = reset;
        }
    }

    /// Snapshot of the current state
    pub fn info(&self) -> RateLimitInfo {
        self.info.lock().expect("rate limit lock poisoned").clone()
    }

    /// Time to wait before the next request, when the window is exhausted
    pub fn should_wait(&self) -> Option<Duration> {
        let info = self.info.lock().expect("rate limit lock poisoned");
        let exhausted = info.requests_remaining == Some(0) || info.tokens_remaining == Some(0);
        if !exhausted {
            return None;
        }

        let reset = info.reset_at?;
        let now = Utc::now();
        if reset > now {
            reset.signed_duration_since(now).to_std().ok()
        } else {
            None
        }
    }

    /// Refuse a call locally when the vendor already reported an empty window
    pub fn check(&self) -> BackendResult<()> {
        match self.should_wait() {
            Some(wait) => Err(BackendError::RateLimit {
                retry_after: Some(wait),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_updates_from_headers() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers(&[
            ("x-ratelimit-limit-requests", "500"),
            ("x-ratelimit-remaining-requests", "499"),
            ("x-ratelimit-remaining-tokens", "12000"),
        ]));

        let info = tracker.info();
        assert_eq!(info.requests_limit, Some(500));
        assert_eq!(info.requests_remaining, Some(499));
        assert_eq!(info.tokens_remaining, Some(12000));
        assert!(tracker.check().is_ok());
    }

    #[test]
    fn test_exhausted_window_refuses_locally() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers(&[
            ("x-ratelimit-remaining-requests", "0"),
            ("x-ratelimit-reset-requests", "30s"),
        ]));

        let wait = tracker.should_wait().expect("should wait");
        assert!(wait <= Duration::from_secs(30));
        assert!(wait > Duration::from_secs(25));

        let err = tracker.check().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_exhausted_without_reset_does_not_block() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers(&[("x-ratelimit-remaining-requests", "0")]));
        assert!(tracker.should_wait().is_none());
    }

    #[test]
    fn test_parse_reset_formats() {
        let now = Utc::now();
        assert_eq!(parse_reset("6m0s", now), Some(now + chrono::Duration::seconds(360)));
        assert_eq!(parse_reset("250ms", now), Some(now + chrono::Duration::milliseconds(250)));
        assert_eq!(parse_reset("1.5s", now), Some(now + chrono::Duration::milliseconds(1500)));
        assert_eq!(parse_reset("20", now), Some(now + chrono::Duration::seconds(20)));
        assert!(parse_reset("soon", now).is_none());
    }

    #[test]
    fn test_out_of_range_reset_is_ignored() {
        let now = Utc::now();
        assert!(parse_reset("-99999999999999999", now).is_none());
        assert!(parse_reset("99999999999999999999h", now).is_none());
        assert!(parse_reset("9999999999999999s", now).is_none());

        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers(&[
            ("x-ratelimit-remaining-requests", "0"),
            ("x-ratelimit-reset-requests", "-99999999999999999"),
        ]));
        tracker.update_from_headers(&headers(&[(
            "x-ratelimit-reset-requests",
            "99999999999999999999h",
        )]));
        assert_eq!(tracker.info().reset_at, None);
        assert!(tracker.check().is_ok());
    }
}
