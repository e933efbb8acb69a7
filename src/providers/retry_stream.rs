//! Retry wrapping for streaming calls.
//!
//! [`crate::retry::retry_with_policy`] retries a single `Future`, which
//! works for the non-streaming path but can't retry mid-stream: a
//! `StreamInterruptionError` raised after some blocks were already yielded
//! must restart the whole upstream call while the consumer keeps receiving
//! items from the same logical stream, without replaying what was already
//! sent.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;

use super::traits::ChatCompletionStream;
use crate::error::RuntimeError;
use crate::retry::{retry_after_hint, RetryPolicy, ThrottleKind};
use crate::telemetry;

enum State {
    Pending(u32),
    Active(u32, ChatCompletionStream),
    Done,
}

/// Wraps a stream-producing operation with retry semantics: on a transient
/// error raised either before the stream starts or mid-body, sleeps per
/// `policy` and calls `start` again for a fresh attempt. Already-yielded
/// items from a prior attempt are never replayed; consumers see them once,
/// followed by the replacement attempt's items.
pub fn retry_stream<F, Fut>(
    policy: RetryPolicy,
    provider_name: String,
    tracker: Option<std::sync::Arc<dyn Fn(Duration, ThrottleKind) + Send + Sync>>,
    start: F,
) -> ChatCompletionStream
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ChatCompletionStream, RuntimeError>> + Send + 'static,
{
    let start = std::sync::Arc::new(start);
    let stream = futures_util::stream::unfold(State::Pending(0), move |state| {
        let policy = policy.clone();
        let provider_name = provider_name.clone();
        let tracker = tracker.clone();
        let start = start.clone();
        async move {
            let mut state = state;
            loop {
                match state {
                    State::Done => return None,
                    State::Pending(attempt) => match (start)().await {
                        Ok(inner) => {
                            state = State::Active(attempt, inner);
                        }
                        Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                            sleep_before_retry(&policy, &provider_name, attempt, &e, &tracker)
                                .await;
                            state = State::Pending(attempt + 1);
                        }
                        Err(e) => return Some((Err(e), State::Done)),
                    },
                    State::Active(attempt, mut inner) => match inner.next().await {
                        Some(Ok(item)) => return Some((Ok(item), State::Active(attempt, inner))),
                        Some(Err(e)) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                            sleep_before_retry(&policy, &provider_name, attempt, &e, &tracker)
                                .await;
                            state = State::Pending(attempt + 1);
                        }
                        Some(Err(e)) => return Some((Err(e), State::Done)),
                        None => return None,
                    },
                }
            }
        }
    });
    Box::pin(stream)
}

async fn sleep_before_retry(
    policy: &RetryPolicy,
    provider_name: &str,
    attempt: u32,
    err: &RuntimeError,
    tracker: &Option<std::sync::Arc<dyn Fn(Duration, ThrottleKind) + Send + Sync>>,
) {
    metrics::counter!(telemetry::RETRIES_TOTAL,
        "provider" => provider_name.to_owned(),
        "operation" => "generate_chat_completion",
    )
    .increment(1);
    let explicit = retry_after_hint(err);
    let kind = if explicit.is_some() {
        ThrottleKind::RetryAfter
    } else {
        ThrottleKind::Backoff
    };
    let delay = policy.effective_delay(attempt, explicit);
    tracing::warn!(
        provider = provider_name,
        attempt = attempt + 1,
        max_attempts = policy.max_attempts,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "retrying streaming call after transient error"
    );
    if let Some(tracker) = tracker {
        tracker(delay, kind);
    }
    tokio::time::sleep(delay).await;
}
