//! Retry/backoff engine: exponential backoff with jitter, `Retry-After`
//! honoring, and a throttle-wait tracker callback.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::RuntimeError;
use crate::telemetry;

/// Retry policy configuration.
///
/// Defaults match the spec literally: five attempts, a five-second initial
/// delay doubling on each non-explicit wait, capped at thirty seconds, with
/// +/-30% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction applied as `delay * jitter_fraction * U(-1, 1)`.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(30_000),
            jitter_fraction: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff delay before the given (0-indexed) attempt, without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Applies `delay * jitter_fraction * U(-1, 1)`, clamped to stay
    /// non-negative.
    fn jittered(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let u: f64 = rng.gen_range(-1.0..=1.0);
        let delta = delay.as_secs_f64() * self.jitter_fraction * u;
        let seconds = (delay.as_secs_f64() + delta).max(0.0);
        Duration::from_secs_f64(seconds)
    }

    /// Effective delay for an attempt, honoring an explicit `Retry-After`
    /// duration over calculated backoff when present. An explicit wait does
    /// not count toward the doubling progression of subsequent attempts.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(d) => d,
            None => self.jittered(self.base_delay(attempt)),
        }
    }
}

/// Parses a `Retry-After` header value as either integer seconds or an HTTP
/// date, returning `max(0, target - now)` for the date form.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let target = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let now = chrono::Utc::now();
    let delta = target.with_timezone(&chrono::Utc) - now;
    let millis = delta.num_milliseconds().max(0) as u64;
    Some(Duration::from_millis(millis))
}

/// Marker passed to a throttle tracker describing why the engine slept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleKind {
    Backoff,
    RetryAfter,
}

/// Default `shouldRetry`: 429/5xx `Api` errors, messages mentioning "429" or
/// a 5xx-shaped number, or a chain classified transient-network.
pub fn default_should_retry(err: &RuntimeError) -> bool {
    err.is_transient()
}

/// Runs `operation` with retry, sleeping between attempts per `policy` and
/// reporting every slept duration to `tracker` (if given) for throttle-wait
/// accounting.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    provider_name: &str,
    operation_name: &str,
    should_retry: impl Fn(&RuntimeError) -> bool,
    tracker: Option<&(dyn Fn(Duration, ThrottleKind) + Send + Sync)>,
    operation: F,
) -> Result<T, RuntimeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if should_retry(&e) => {
                metrics::counter!(telemetry::RETRIES_TOTAL,
                    "provider" => provider_name.to_owned(),
                    "operation" => operation_name.to_owned(),
                )
                .increment(1);
                if attempt + 1 < policy.max_attempts {
                    let explicit = retry_after_hint(&e);
                    let kind = if explicit.is_some() {
                        ThrottleKind::RetryAfter
                    } else {
                        ThrottleKind::Backoff
                    };
                    let delay = policy.effective_delay(attempt, explicit);
                    warn!(
                        provider = provider_name,
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    if let Some(tracker) = tracker {
                        tracker(delay, kind);
                    }
                    let kind_label = match kind {
                        ThrottleKind::Backoff => "backoff",
                        ThrottleKind::RetryAfter => "retry_after",
                    };
                    metrics::histogram!(telemetry::THROTTLE_WAIT_SECONDS,
                        "provider" => provider_name.to_owned(),
                        "kind" => kind_label,
                    )
                    .record(delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(RuntimeError::Unhandled("retry exhausted with no error".into())))
}

/// Extracts an explicit wait duration from an `Api` error's structured
/// `retry_after` field, set by [`crate::providers::common::send_and_classify`]
/// from the response's `Retry-After` header.
pub(crate) fn retry_after_hint(err: &RuntimeError) -> Option<Duration> {
    if let RuntimeError::Api { retry_after, .. } = err {
        return retry_after.as_deref().and_then(parse_retry_after);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::new().max_attempts(3);
        let result = retry_with_policy(
            &policy,
            "test",
            "op",
            default_should_retry,
            None,
            || async { Ok::<_, RuntimeError>(42) },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry_with_policy(
            &policy,
            "test",
            "op",
            default_should_retry,
            None,
            move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 1 {
                        Err(RuntimeError::Api {
                            status: 503,
                            message: "unavailable".into(),
                            retry_after: None,
                        })
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::new().max_attempts(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, _> = retry_with_policy(
            &policy,
            "test",
            "op",
            default_should_retry,
            None,
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RuntimeError::Auth {
                        provider_name: "openai".into(),
                        hint: "no key".into(),
                    })
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_http_date_in_the_past_as_zero() {
        let d = parse_retry_after("Thu, 01 Jan 1970 00:00:00 GMT").unwrap();
        assert_eq!(d, Duration::from_millis(0));
    }

    #[test]
    fn jitter_stays_non_negative_and_bounded() {
        let policy = RetryPolicy::new();
        for attempt in 0..5 {
            let d = policy.effective_delay(attempt, None);
            assert!(d.as_secs_f64() >= 0.0);
            assert!(d <= policy.max_delay + Duration::from_secs_f64(policy.max_delay.as_secs_f64() * policy.jitter_fraction));
        }
    }

    #[test]
    fn explicit_retry_after_takes_precedence() {
        let policy = RetryPolicy::new();
        let d = policy.effective_delay(0, Some(Duration::from_secs(7)));
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn retry_after_hint_reads_structured_field() {
        let err = RuntimeError::Api {
            status: 429,
            message: "rate limited".into(),
            retry_after: Some("2".into()),
        };
        assert_eq!(retry_after_hint(&err), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_hint_is_none_without_header() {
        let err = RuntimeError::Api {
            status: 429,
            message: "rate limited".into(),
            retry_after: None,
        };
        assert_eq!(retry_after_hint(&err), None);
    }
}
