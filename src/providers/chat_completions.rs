//! OpenAI-style Chat-Completions wire adapter: request/response shapes and
//! per-index tool-call delta aggregation.

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
use crate::types::{ProviderCapabilities, ToolDefinition, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-Completions streaming chat adapter.
pub struct ChatCompletionsProvider {
    http: HttpClientCache,
    auth: AuthResolver,
    env_vars: Vec<&'static str>,
    retry_policy: RetryPolicy,
}

impl ChatCompletionsProvider {
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

impl Default for ChatCompletionsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatCompletionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            max_tokens: Some(32_768),
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
        let max_tokens = options
            .model_params
            .max_tokens
            .map(|m| m as u32)
            .unwrap_or_else(|| default_max_tokens(&model));
        let stream_enabled = streaming_enabled(&options.settings);

        let vars = default_variables(&model, self.name());
        let system_prompt = compose_prompt("{{MODEL}}", &vars, options.user_memory.as_deref());

        let content = ensure_leading_human(options.content.clone());
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: Some(system_prompt),
            tool_calls: None,
            tool_call_id: None,
        }];
        messages.extend(to_wire_messages(content));

        let tools = options.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(ChatCompletionsTool::from_definition)
                .collect::<Vec<_>>()
        });

        let headers = merged_custom_headers(&HashMap::new(), &HashMap::new(), &options.settings);

        let request_body = ChatCompletionsRequest {
            model: model.clone(),
            messages,
            stream: stream_enabled,
            stream_options: if stream_enabled {
                Some(StreamOptions { include_usage: true })
            } else {
                None
            },
            max_tokens: Some(max_tokens),
            temperature: options.model_params.temperature,
            top_p: options.model_params.top_p,
            stop: options.model_params.stop.clone(),
            tools,
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
                    .post(format!("{base_url}/chat/completions"))
                    .bearer_auth(&auth_token)
                    .json(&body);
                for (key, value) in &headers {
                    request = request.header(key, value);
                }

                let response = send_and_classify(request).await?;

                if body.stream {
                    let byte_stream = response.bytes_stream();
                    let events = parse_sse_stream(byte_stream);
                    Ok(drive_chat_completions_stream(events))
                } else {
                    let parsed: ChatCompletionsResponse = response
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
        Ok(vec!["gpt-4o".to_string(), "gpt-4.1".to_string(), "o3".to_string()])
    }
}

fn to_wire_messages(content: Vec<IContent>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for item in content {
        match item.speaker {
            Speaker::Human => {
                let text = text_of(&item);
                messages.push(ChatMessage {
                    role: "user".to_string(),
                    content: Some(text),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Speaker::Ai => {
                let text = text_of(&item);
                let tool_calls: Vec<WireToolCall> = item
                    .tool_calls()
                    .map(|t| WireToolCall {
                        id: t.id.to_openai(),
                        call_type: "function".to_string(),
                        function: WireFunctionCall {
                            name: t.name.clone(),
                            arguments: t.parameters.to_string(),
                        },
                    })
                    .collect();
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                });
            }
            Speaker::Tool => {
                for response in item.tool_responses() {
                    messages.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(response.result.to_string()),
                        tool_calls: None,
                        tool_call_id: Some(response.call_id.to_openai()),
                    });
                }
            }
        }
    }
    messages
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

fn non_streaming_to_content(response: ChatCompletionsResponse) -> IContent {
    let choice = response.choices.into_iter().next();
    let mut blocks = Vec::new();
    if let Some(choice) = choice {
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text));
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let params = parse_streamed_tool_params(&call.function.arguments);
            blocks.push(ContentBlock::tool_call(
                ToolId::from_wire(&call.id),
                call.function.name,
                params,
            ));
        }
    }
    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
        ..Default::default()
    });
    IContent::new(Speaker::Ai, blocks).with_metadata(crate::content::ContentMetadata {
        usage,
        runtime_id: None,
        provider_name: Some("openai".to_string()),
    })
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatCompletionsTool>>,
}

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatCompletionsFunction,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl ChatCompletionsTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ChatCompletionsFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatCompletionsChoice>,
    usage: Option<ChatCompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChunk {
    choices: Vec<ChatCompletionsChunkChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChunkChoice {
    delta: ChatCompletionsDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionsDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Drives the Chat-Completions streaming chunk sequence. Text deltas are
/// emitted as soon as they arrive; tool-call pieces accumulate per-index
/// (an upstream call may interleave fragments of several tool calls by
/// index before any of them completes) and flush at `finish_reason ==
/// "tool_calls"`.
fn drive_chat_completions_stream(
    events: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<SseEvent, RuntimeError>> + Send>>,
) -> ChatCompletionStream {
    let stream = futures_util::stream::unfold(
        (events, HashMap::<u32, PartialToolCall>::new(), false),
        |(mut events, mut calls, mut flushed)| async move {
            loop {
                let event = match events.next().await {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Some((Err(e), (events, calls, flushed))),
                    None => return None,
                };

                let chunk: ChatCompletionsChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(_) => continue,
                };

                if let Some(usage) = chunk.usage {
                    let item = IContent::new(Speaker::Ai, vec![]).with_metadata(
                        crate::content::ContentMetadata {
                            usage: Some(Usage {
                                prompt_tokens: usage.prompt_tokens,
                                completion_tokens: usage.completion_tokens,
                                total_tokens: usage.total_tokens,
                                ..Default::default()
                            }),
                            runtime_id: None,
                            provider_name: Some("openai".to_string()),
                        },
                    );
                    return Some((Ok(item), (events, calls, flushed)));
                }

                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        return Some((Ok(IContent::ai(text)), (events, calls, flushed)));
                    }
                }

                for piece in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = calls.entry(piece.index).or_default();
                    if let Some(id) = piece.id {
                        entry.id = id;
                    }
                    if let Some(function) = piece.function {
                        if let Some(name) = function.name {
                            entry.name = name;
                        }
                        if let Some(args) = function.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }

                if choice.finish_reason.as_deref() == Some("tool_calls") && !flushed && !calls.is_empty() {
                    flushed = true;
                    let mut indices: Vec<_> = calls.keys().copied().collect();
                    indices.sort_unstable();
                    let blocks: Vec<ContentBlock> = indices
                        .into_iter()
                        .filter_map(|idx| calls.remove(&idx))
                        .map(|call| {
                            let params = parse_streamed_tool_params(&call.arguments);
                            ContentBlock::tool_call(ToolId::from_wire(&call.id), call.name, params)
                        })
                        .collect();
                    let item = IContent::new(Speaker::Ai, blocks);
                    return Some((Ok(item), (events, calls, flushed)));
                }
            }
        },
    );
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_messages_keeps_tool_responses_as_separate_messages() {
        let id_a = ToolId::new();
        let id_b = ToolId::new();
        let content = vec![
            IContent::human("hi"),
            IContent::new(
                Speaker::Tool,
                vec![
                    ContentBlock::tool_response(id_a, serde_json::json!("ok"), None),
                    ContentBlock::tool_response(id_b, serde_json::json!("ok2"), None),
                ],
            ),
        ];
        let messages = to_wire_messages(content);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "tool");
        assert_eq!(messages[2].role, "tool");
    }

    #[tokio::test]
    async fn drives_text_and_aggregated_tool_call() {
        use futures_util::StreamExt as _;

        let events = vec![
            Ok(SseEvent {
                event: None,
                data: r#"{"choices":[{"delta":{"content":"hi"}}]}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"search","arguments":""}}]}}]}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":1}"}}]},"finish_reason":"tool_calls"}]}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#.into(),
            }),
        ];
        let stream = drive_chat_completions_stream(Box::pin(futures_util::stream::iter(events)));
        let items: Vec<_> = stream.collect().await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 3);
        match &items[1].blocks[0] {
            ContentBlock::ToolCall(t) => {
                assert_eq!(t.name, "search");
                assert_eq!(t.parameters, serde_json::json!({"q": 1}));
            }
            _ => panic!("expected tool call"),
        }
        let usage = items[2].metadata.as_ref().unwrap().usage.unwrap();
        assert_eq!(usage.total_tokens, 2);
    }
}
