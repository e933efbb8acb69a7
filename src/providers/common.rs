//! Helpers shared by every wire adapter: model-aware token defaults,
//! streaming toggling, custom-header merging, and response classification.

use std::collections::HashMap;

use crate::error::{classify_transient, RuntimeError};
use crate::runtime_context::SettingsSnapshot;

/// Default `max_tokens` for a model when the caller didn't set one, matched
/// by the first substring hit in this table; falls back to 4096.
pub fn default_max_tokens(model: &str) -> u32 {
    const TABLE: &[(&str, u32)] = &[
        ("claude-3-5", 8192),
        ("claude-3-7", 8192),
        ("claude-opus-4", 32_000),
        ("claude-sonnet-4", 64_000),
        ("gemini-2.5", 65_536),
        ("gemini-2.0", 8192),
        ("gemini-1.5", 8192),
        ("o1", 100_000),
        ("o3", 100_000),
        ("gpt-4.1", 32_768),
        ("gpt-4o", 16_384),
    ];
    TABLE
        .iter()
        .find(|(needle, _)| model.contains(needle))
        .map(|(_, tokens)| *tokens)
        .unwrap_or(4096)
}

/// Whether the request should stream, per ephemeral override. Streaming is
/// the default; only an explicit `"streaming" == "disabled"` turns it off.
pub fn streaming_enabled(settings: &SettingsSnapshot) -> bool {
    settings.ephemeral_str("streaming") != Some("disabled")
}

/// Merges custom headers with later sources winning: adapter defaults, then
/// config-declared headers, then the ephemeral `"custom-headers"` override.
pub fn merged_custom_headers(
    base_defaults: &HashMap<String, String>,
    config_headers: &HashMap<String, String>,
    settings: &SettingsSnapshot,
) -> HashMap<String, String> {
    let mut merged = base_defaults.clone();
    merged.extend(config_headers.clone());
    merged.extend(settings.custom_headers());
    merged
}

/// Sends a request and classifies a non-2xx response as `ApiError`,
/// carrying the response's `Retry-After` header (if any) as a structured
/// field so [`crate::retry::retry_after_hint`] can recover it without
/// reparsing free text. Connect/timeout failures, and any transport error
/// whose `source()` chain (TCP reset, DNS hiccup, etc.) walks to a
/// transient-network cause per [`classify_transient`], are reported as
/// stream interruptions so the retry engine's transient classification
/// picks them up uniformly with mid-stream disconnects.
pub async fn send_and_classify(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, RuntimeError> {
    let response = request.send().await.map_err(|e| {
        if e.is_connect() || e.is_timeout() || classify_transient(&e) {
            RuntimeError::stream_interruption(e.to_string(), None)
        } else {
            RuntimeError::Unhandled(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let message = response.text().await.unwrap_or_default();
    Err(RuntimeError::Api {
        status: status.as_u16(),
        message,
        retry_after,
    })
}
