/// Retry and rate-limit timing for HTTP fetches.
///
/// Delays follow the Discord CDN/API conventions: `Retry-After` on 429,
/// advisory `X-RateLimit-*` headers on success, and exponential backoff
/// (`2^attempt + base`) for server and network errors.
use std::time::Duration;

/// Default number of attempts per request.
pub const MAX_RETRY_ATTEMPTS: u32 = 8;

/// Ceiling for server-supplied waits. Discord occasionally sends absurd values.
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Retry-After value assumed when a 429 carries no header.
const DEFAULT_RETRY_AFTER: &str = "5";

/// How a non-success HTTP status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// 429: wait for Retry-After, then retry.
    RateLimited,
    /// 408 or 5xx: exponential backoff, then retry.
    Transient,
    /// 404: missing file or expired signed URL.
    NotFound,
    /// Any other client error.
    Fatal,
}

/// Classify a non-success status code.
pub fn classify(status: u16) -> RetryClass {
    match status {
        429 => RetryClass::RateLimited,
        408 => RetryClass::Transient,
        500..=599 => RetryClass::Transient,
        404 => RetryClass::NotFound,
        _ => RetryClass::Fatal,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Length of one backoff step. One second in production.
    pub backoff_unit: Duration,
    /// Steps added on top of `2^attempt`.
    pub base_backoff: u32,
    /// Cap for Retry-After and rate-limit reset waits.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
            base_backoff: 1,
            max_retry_after: Duration::from_secs(MAX_RETRY_AFTER_SECS),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a 0-based attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let steps = 2u32.saturating_pow(attempt).saturating_add(self.base_backoff);
        self.backoff_unit.saturating_mul(steps)
    }

    /// Wait derived from a 429 `Retry-After` header, plus one second of slack.
    pub fn retry_after_delay(&self, header: Option<&str>) -> Duration {
        let raw = header.unwrap_or(DEFAULT_RETRY_AFTER);
        match raw.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() => self.capped_secs(secs.max(0.0) + 1.0),
            _ => self.max_retry_after,
        }
    }

    /// Wait before the next request when the advisory headers say the bucket is empty.
    pub fn preemptive_delay(
        &self,
        remaining: Option<&str>,
        reset_after: Option<&str>,
    ) -> Option<Duration> {
        let remaining: i64 = remaining?.trim().parse().ok()?;
        let reset_after: f64 = reset_after?.trim().parse().ok()?;
        if remaining > 0 || !reset_after.is_finite() {
            return None;
        }
        Some(self.capped_secs(reset_after.max(0.0) + 1.0))
    }

    fn capped_secs(&self, secs: f64) -> Duration {
        let cap = self.max_retry_after.as_secs_f64();
        Duration::from_secs_f64(secs.min(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(9));
        assert_eq!(policy.backoff_delay(7), Duration::from_secs(129));
    }

    #[test]
    fn test_backoff_scales_with_unit() {
        let policy = RetryPolicy {
            backoff_unit: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(5));
    }

    #[test]
    fn test_retry_after_adds_slack_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_after_delay(Some("2")), Duration::from_secs(3));
        assert_eq!(policy.retry_after_delay(Some("0.5")), Duration::from_secs_f64(1.5));
        assert_eq!(policy.retry_after_delay(Some("3600")), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_after_missing_or_garbage() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_after_delay(None), Duration::from_secs(6));
        assert_eq!(policy.retry_after_delay(Some("soon")), Duration::from_secs(60));
    }

    #[test]
    fn test_preemptive_delay_only_when_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.preemptive_delay(Some("3"), Some("1.0")), None);
        assert_eq!(policy.preemptive_delay(Some("0"), Some("1.5")), Some(Duration::from_secs_f64(2.5)));
        assert_eq!(policy.preemptive_delay(Some("0"), Some("500")), Some(Duration::from_secs(60)));
        assert_eq!(policy.preemptive_delay(None, Some("1")), None);
        assert_eq!(policy.preemptive_delay(Some("x"), Some("1")), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(429), RetryClass::RateLimited);
        assert_eq!(classify(408), RetryClass::Transient);
        assert_eq!(classify(502), RetryClass::Transient);
        assert_eq!(classify(404), RetryClass::NotFound);
        assert_eq!(classify(403), RetryClass::Fatal);
    }
}
