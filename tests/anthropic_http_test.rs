//! Wiremock integration tests driving `AnthropicProvider` through an actual
//! HTTP round trip: retry-after honoring, runtime-scoped client isolation.

use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use llxprt_runtime::providers::ChatCompletionProvider;
use llxprt_runtime::runtime_context::{NormalizedGenerateChatOptions, ResolvedCallParams, RuntimeContext};
use llxprt_runtime::{AnthropicProvider, ContentBlock, IContent, SettingsSnapshot};

/// Responds with `429 + Retry-After` on the first call, then a normal
/// non-streaming reply on every call after — deterministic regardless of
/// wiremock's mock-priority ordering, unlike stacking two `Mock`s.
struct RateLimitThenOk {
    calls: AtomicU32,
}

impl Respond for RateLimitThenOk {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_string("rate limited")
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }))
        }
    }
}

fn options_for(server: &MockServer, runtime_id: &str) -> NormalizedGenerateChatOptions {
    let runtime = RuntimeContext::snapshot(Some(runtime_id), None, None);
    NormalizedGenerateChatOptions::new(
        vec![IContent::human("hi")],
        runtime,
        SettingsSnapshot::new().with_ephemeral("streaming", serde_json::json!("disabled")),
    )
    .with_resolved(ResolvedCallParams {
        base_url: Some(server.uri()),
        auth_token: Some("test-key".to_string()),
    })
}

#[tokio::test]
async fn retry_after_header_is_honored_before_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(RateLimitThenOk { calls: AtomicU32::new(0) })
        .expect(2)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new();
    let options = options_for(&server, "rt-s1");

    let start = std::time::Instant::now();
    let mut stream = provider.generate_chat_completion(options).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    let elapsed = start.elapsed();

    match &first.blocks[0] {
        ContentBlock::Text(t) => assert_eq!(t.text, "ok"),
        other => panic!("expected text block, got {other:?}"),
    }
    assert!(
        elapsed.as_millis() >= 900,
        "expected the engine to honor the 1s Retry-After wait, took {elapsed:?}"
    );
    assert!(
        elapsed.as_millis() < 3000,
        "expected the 1s Retry-After wait, not the ~5s exponential-backoff \
         default, took {elapsed:?}"
    );
}

#[tokio::test]
async fn two_runtimes_hitting_the_same_endpoint_never_share_a_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "ok"}],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        })))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new();

    let mut stream_a = provider
        .generate_chat_completion(options_for(&server, "rt-a"))
        .await
        .unwrap();
    stream_a.next().await.unwrap().unwrap();

    let mut stream_b = provider
        .generate_chat_completion(options_for(&server, "rt-b"))
        .await
        .unwrap();
    stream_b.next().await.unwrap().unwrap();

    // Both calls succeed independently; no panic/shared-state corruption
    // between differing runtime ids hitting the identical endpoint/token.
}

#[tokio::test]
async fn non_429_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new();
    let options = options_for(&server, "rt-400");
    let mut stream = provider.generate_chat_completion(options).await.unwrap();
    let result = stream.next().await.unwrap();
    assert!(result.is_err());
}
