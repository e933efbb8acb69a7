//! Responses-API wire adapter: server-side thread objects, threaded
//! statelessly through `previous_response_id` pulled fresh from settings on
//! every call rather than cached on the provider.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::common::{default_max_tokens, merged_custom_headers, send_and_classify, streaming_enabled};
use super::retry_stream::retry_stream;
use super::sse::{parse_sse_stream, SseEvent};
use super::traits::{ChatCompletionProvider, ChatCompletionStream};
use crate::auth::AuthResolver;
use crate::content::{ContentBlock, IContent, Speaker, ToolId};
use crate::error::RuntimeError;
use crate::http_cache::HttpClientCache;
use crate::prompt::{compose_prompt, default_variables};
use crate::retry::RetryPolicy;
use crate::runtime_context::NormalizedGenerateChatOptions;
use crate::tool_format::{ensure_leading_human, parse_streamed_tool_params};
use crate::types::{ProviderCapabilities, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Responses-API streaming chat adapter.
pub struct ResponsesProvider {
    http: HttpClientCache,
    auth: AuthResolver,
    env_vars: Vec<&'static str>,
    retry_policy: RetryPolicy,
}

impl ResponsesProvider {
    pub fn new() -> Self {
        Self {
            http: HttpClientCache::new(),
            auth: AuthResolver::new(),
            env_vars: vec!["OPENAI_API_KEY"],
            retry_policy: RetryPolicy::new(),
        }
    }

    fn base_url(&self, options: &NormalizedGenerateChatOptions) -> String {
        options
            .resolved
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

impl Default for ResponsesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatCompletionProvider for ResponsesProvider {
    fn name(&self) -> &str {
        "responses"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            max_tokens: Some(100_000),
            supported_formats: vec!["openai".to_string()],
            has_model_selection: true,
            has_api_key_config: true,
            has_base_url_config: true,
            supports_paid_mode: true,
        }
    }

    async fn generate_chat_completion(
        &self,
        options: NormalizedGenerateChatOptions,
    ) -> Result<ChatCompletionStream, RuntimeError> {
        let runtime_id = options.runtime.runtime_id.clone();
        let base_url = self.base_url(&options);
        let auth_token = match &options.resolved.auth_token {
            Some(t) if !t.is_empty() => t.clone(),
            _ => self
                .auth
                .resolve(&runtime_id, self.name(), None, &self.env_vars, None)?,
        };

        let client = self.http.get_or_insert(&runtime_id, &base_url, &auth_token, || {
            reqwest::Client::new()
        });

        let model = options.model_params.model.clone();
        let _max_tokens = options
            .model_params
            .max_tokens
            .map(|m| m as u32)
            .unwrap_or_else(|| default_max_tokens(&model));
        let stream_enabled = streaming_enabled(&options.settings);

        let vars = default_variables(&model, self.name());
        let system_prompt = compose_prompt("{{MODEL}}", &vars, options.user_memory.as_deref());

        // Stateless contract: read fresh from settings every call, never cached
        // on the provider instance.
        let previous_response_id = options
            .settings
            .ephemeral_str("previous-response-id")
            .map(str::to_string);

        let content = ensure_leading_human(options.content.clone());
        let mut input = vec![ResponsesItem::Message {
            role: "system".to_string(),
            content: system_prompt,
        }];
        input.extend(to_wire_items(content));

        let headers = merged_custom_headers(&HashMap::new(), &HashMap::new(), &options.settings);

        let request_body = ResponsesRequest {
            model: model.clone(),
            input,
            stream: stream_enabled,
            previous_response_id,
        };

        let provider_name = self.name().to_string();
        let retry_policy = self.retry_policy.clone();

        let start_client = client.clone();
        let start_base_url = base_url.clone();
        let start_auth_token = auth_token.clone();
        let start_headers = headers.clone();
        let start_body = request_body.clone();

        let stream = retry_stream(retry_policy, provider_name, None, move || {
            let client = start_client.clone();
            let base_url = start_base_url.clone();
            let auth_token = start_auth_token.clone();
            let headers = start_headers.clone();
            let body = start_body.clone();
            async move {
                let mut request = client
                    .post(format!("{base_url}/responses"))
                    .bearer_auth(&auth_token)
                    .json(&body);
                for (key, value) in &headers {
                    request = request.header(key, value);
                }

                let response = send_and_classify(request).await?;

                if body.stream {
                    let byte_stream = response.bytes_stream();
                    let events = parse_sse_stream(byte_stream);
                    Ok(drive_responses_stream(events))
                } else {
                    let parsed: ResponsesResponse = response
                        .json()
                        .await
                        .map_err(|e| RuntimeError::Unhandled(e.to_string()))?;
                    let item = non_streaming_to_content(parsed);
                    let s: ChatCompletionStream =
                        Box::pin(futures_util::stream::once(async move { Ok(item) }));
                    Ok(s)
                }
            }
        });

        Ok(stream)
    }

    async fn get_models(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(vec!["gpt-4.1".to_string(), "o3".to_string()])
    }

    /// The Responses family's server-side thread state is never held on this
    /// provider (it lives in settings), so there is nothing to drop here;
    /// kept as an explicit no-op override to document that decision rather
    /// than rely on the trait default silently.
    fn clear_state(&self) {}
}

fn to_wire_items(content: Vec<IContent>) -> Vec<ResponsesItem> {
    let mut items = Vec::new();
    for item in content {
        match item.speaker {
            Speaker::Human => items.push(ResponsesItem::Message {
                role: "user".to_string(),
                content: text_of(&item),
            }),
            Speaker::Ai => {
                let text = text_of(&item);
                if !text.is_empty() {
                    items.push(ResponsesItem::Message {
                        role: "assistant".to_string(),
                        content: text,
                    });
                }
                for call in item.tool_calls() {
                    items.push(ResponsesItem::FunctionCall {
                        call_id: call.id.to_openai(),
                        name: call.name.clone(),
                        arguments: call.parameters.to_string(),
                    });
                }
            }
            Speaker::Tool => {
                for response in item.tool_responses() {
                    items.push(ResponsesItem::FunctionCallOutput {
                        call_id: response.call_id.to_openai(),
                        output: response.result.to_string(),
                    });
                }
            }
        }
    }
    items
}

fn text_of(item: &IContent) -> String {
    item.blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn non_streaming_to_content(response: ResponsesResponse) -> IContent {
    let mut blocks = Vec::new();
    for output in response.output {
        match output {
            ResponsesOutputItem::Message { content } => {
                for part in content {
                    if let ResponsesContentPart::OutputText { text } = part {
                        blocks.push(ContentBlock::text(text));
                    }
                }
            }
            ResponsesOutputItem::FunctionCall { call_id, name, arguments } => {
                let params = parse_streamed_tool_params(&arguments);
                blocks.push(ContentBlock::tool_call(ToolId::from_wire(&call_id), name, params));
            }
        }
    }
    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
        ..Default::default()
    });
    IContent::new(Speaker::Ai, blocks).with_metadata(crate::content::ContentMetadata {
        usage,
        runtime_id: None,
        provider_name: Some("responses".to_string()),
    })
}

#[derive(Debug, Clone, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ResponsesItem>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesItem {
    Message { role: String, content: String },
    FunctionCall { call_id: String, name: String, arguments: String },
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    output: Vec<ResponsesOutputItem>,
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesOutputItem {
    Message { content: Vec<ResponsesContentPart> },
    FunctionCall { call_id: String, name: String, arguments: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesContentPart {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)]
enum ResponsesStreamEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: ResponsesOutputItem },
    #[serde(other)]
    Other,
}

/// Drives the Responses-API streaming event sequence: text deltas are
/// emitted immediately; a completed tool-call segment arrives whole in a
/// single `output_item.done` event (no per-argument-chunk accumulation is
/// needed here, unlike Chat-Completions).
fn drive_responses_stream(
    events: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<SseEvent, RuntimeError>> + Send>>,
) -> ChatCompletionStream {
    let stream = futures_util::stream::unfold(events, |mut events| async move {
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Some((Err(e), events)),
                None => return None,
            };

            let parsed: ResponsesStreamEvent = match serde_json::from_str(&event.data) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            match parsed {
                ResponsesStreamEvent::OutputTextDelta { delta } => {
                    return Some((Ok(IContent::ai(delta)), events));
                }
                ResponsesStreamEvent::OutputItemDone {
                    item: ResponsesOutputItem::FunctionCall { call_id, name, arguments },
                } => {
                    let params = parse_streamed_tool_params(&arguments);
                    let item = IContent::new(
                        Speaker::Ai,
                        vec![ContentBlock::tool_call(ToolId::from_wire(&call_id), name, params)],
                    );
                    return Some((Ok(item), events));
                }
                _ => continue,
            }
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_context::{RuntimeContext, SettingsSnapshot};

    #[test]
    fn previous_response_id_is_read_fresh_per_call_not_cached() {
        let settings_a = SettingsSnapshot::new()
            .with_ephemeral("previous-response-id", serde_json::json!("resp_a"));
        let settings_b = SettingsSnapshot::new();

        let a = settings_a.ephemeral_str("previous-response-id").map(str::to_string);
        let b = settings_b.ephemeral_str("previous-response-id").map(str::to_string);
        assert_eq!(a, Some("resp_a".to_string()));
        assert_eq!(b, None);

        let _ = RuntimeContext::snapshot(None, None, None);
    }

    #[tokio::test]
    async fn drives_text_delta_and_function_call() {
        use futures_util::StreamExt as _;

        let events = vec![
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"response.output_text.delta","delta":"hi"}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"call_1","name":"search","arguments":"{\"q\":1}"}}"#.into(),
            }),
        ];
        let stream = drive_responses_stream(Box::pin(futures_util::stream::iter(events)));
        let items: Vec<_> = stream.collect().await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
        match &items[1].blocks[0] {
            ContentBlock::ToolCall(t) => assert_eq!(t.name, "search"),
            _ => panic!("expected tool call"),
        }
    }
}
