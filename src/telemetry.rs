//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `llxprt_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider` — provider name (e.g. "anthropic", "gemini")
//! - `operation` — call kind (e.g. "generate_chat_completion", "get_models")
//! - `status` — outcome: "ok" or "error"
//! - `direction` — token direction: "prompt" or "completion"

/// Total requests dispatched through a provider.
///
/// Labels: `provider`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "llxprt_requests_total";

/// Request duration in seconds.
///
/// Labels: `provider`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "llxprt_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`, `operation`.
pub const RETRIES_TOTAL: &str = "llxprt_retries_total";

/// Total seconds spent sleeping on throttle waits, split by whether the
/// wait came from an explicit `Retry-After` or calculated backoff.
///
/// Labels: `provider`, `kind` ("backoff" | "retry_after").
pub const THROTTLE_WAIT_SECONDS: &str = "llxprt_throttle_wait_seconds";

/// Total tokens consumed.
///
/// Labels: `provider`, `direction` ("prompt" | "completion").
pub const TOKENS_TOTAL: &str = "llxprt_tokens_total";

/// Total cache hits on the HTTP client cache.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "llxprt_cache_hits_total";

/// Total cache misses on the HTTP client cache.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "llxprt_cache_misses_total";
