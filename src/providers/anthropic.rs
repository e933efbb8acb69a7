//! Anthropic-messages wire adapter: request/response shapes, the SSE
//! streaming state machine, and the OAuth system-prompt injection quirk.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::common::{default_max_tokens, merged_custom_headers, send_and_classify, streaming_enabled};
use super::retry_stream::retry_stream;
use super::sse::{parse_sse_stream, SseEvent};
use super::traits::{ChatCompletionProvider, ChatCompletionStream};
use crate::auth::{AuthResolver, OAuthTokenSource};
use crate::content::{ContentBlock, IContent, Speaker, ToolId};
use crate::error::RuntimeError;
use crate::http_cache::HttpClientCache;
use crate::prompt::{compose_prompt, default_variables};
use crate::retry::RetryPolicy;
use crate::runtime_context::NormalizedGenerateChatOptions;
use crate::tool_format::{ensure_leading_human, parse_streamed_tool_params, prune_orphan_tool_responses};
use crate::types::{ProviderCapabilities, ToolDefinition, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// Fixed system string Anthropic's OAuth policy substitutes in, no matter
/// what system prompt the caller composed. The composed prompt is injected
/// into the first user turn instead; see [`inject_oauth_system_prefix`].
const OAUTH_FIXED_SYSTEM: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

/// Anthropic-messages streaming chat adapter.
pub struct AnthropicProvider {
    http: HttpClientCache,
    auth: AuthResolver,
    oauth: Option<Arc<dyn OAuthTokenSource>>,
    env_vars: Vec<&'static str>,
    retry_policy: RetryPolicy,
    last_runtime_id: RwLock<Option<String>>,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            http: HttpClientCache::new(),
            auth: AuthResolver::new(),
            oauth: None,
            env_vars: vec!["ANTHROPIC_API_KEY"],
            retry_policy: RetryPolicy::new(),
            last_runtime_id: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_oauth(mut self, source: Arc<dyn OAuthTokenSource>) -> Self {
        self.oauth = Some(source);
        self
    }

    fn base_url(&self, options: &NormalizedGenerateChatOptions) -> String {
        options
            .resolved
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn is_oauth(&self, token: &str) -> bool {
        self.oauth.is_some() && token.starts_with("sk-ant-oat")
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatCompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            max_tokens: Some(64_000),
            supported_formats: vec!["anthropic".to_string()],
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
        *self.last_runtime_id.write().unwrap() = Some(options.runtime.runtime_id.clone());

        let runtime_id = options.runtime.runtime_id.clone();
        let base_url = self.base_url(&options);
        let auth_token = match &options.resolved.auth_token {
            Some(t) if !t.is_empty() => t.clone(),
            _ => self.auth.resolve(
                &runtime_id,
                self.name(),
                None,
                &self.env_vars,
                self.oauth.as_deref(),
            )?,
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
        let oauth_mode = self.is_oauth(&auth_token);

        let vars = default_variables(&model, self.name());
        let composed_prompt =
            compose_prompt("{{MODEL}}", &vars, options.user_memory.as_deref());

        let mut content = prune_orphan_tool_responses(options.content.clone());
        content = ensure_leading_human(content);

        let (system, messages) = if oauth_mode {
            (None, inject_oauth_system_prefix(content, &composed_prompt))
        } else {
            (Some(composed_prompt), to_wire_messages(content))
        };

        let tools = options.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(AnthropicTool::from_definition)
                .collect::<Vec<_>>()
        });

        let headers = merged_custom_headers(&HashMap::new(), &HashMap::new(), &options.settings);

        let request_body = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens,
            stream: stream_enabled,
            system,
            tools,
            temperature: options.model_params.temperature,
            top_p: options.model_params.top_p,
            top_k: options.model_params.top_k,
            stop_sequences: options.model_params.stop.clone(),
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
                    .post(format!("{base_url}/messages"))
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body);
                request = if oauth_mode {
                    request
                        .header("authorization", format!("Bearer {auth_token}"))
                        .header("anthropic-beta", OAUTH_BETA_HEADER)
                } else {
                    request.header("x-api-key", auth_token.clone())
                };
                for (key, value) in &headers {
                    request = request.header(key, value);
                }

                let response = send_and_classify(request).await?;

                if body.stream {
                    let byte_stream = response.bytes_stream();
                    let events = parse_sse_stream(byte_stream);
                    Ok(drive_anthropic_stream(events))
                } else {
                    let parsed: AnthropicResponse = response
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
        Ok(vec![
            "claude-opus-4-1-20250805".to_string(),
            "claude-sonnet-4-20250514".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
        ])
    }

    fn clear_state(&self) {
        if let Some(runtime_id) = self.last_runtime_id.write().unwrap().take() {
            self.auth.clear_auth_cache(&runtime_id);
            self.http.evict_runtime(&runtime_id);
        }
    }
}

/// Wraps the composed system prompt as a `<system>...</system>` prefix
/// inside the first message's content blocks, since Anthropic's OAuth
/// policy ignores the `system` field outright. The prefix lands within the
/// existing leading turn rather than as a new message, preserving strict
/// user/assistant alternation.
fn inject_oauth_system_prefix(content: Vec<IContent>, prompt: &str) -> Vec<AnthropicMessage> {
    let mut messages = to_wire_messages(content);
    let prefix = AnthropicContentBlock::Text {
        text: format!("<system>{prompt}</system>"),
    };
    match messages.first_mut() {
        Some(first) => first.content.insert(0, prefix),
        None => messages.push(AnthropicMessage {
            role: "user".to_string(),
            content: vec![prefix],
        }),
    }
    messages
}

/// Converts canonical content into Anthropic wire messages, merging
/// consecutive tool-response items into a single user-role message with one
/// `tool_result` block per response (Anthropic rejects separate messages
/// for each).
fn to_wire_messages(content: Vec<IContent>) -> Vec<AnthropicMessage> {
    let mut messages: Vec<AnthropicMessage> = Vec::new();
    for item in content {
        let role = match item.speaker {
            Speaker::Human | Speaker::Tool => "user",
            Speaker::Ai => "assistant",
        };
        let blocks: Vec<AnthropicContentBlock> = item
            .blocks
            .iter()
            .map(AnthropicContentBlock::from_block)
            .collect();

        if item.speaker == Speaker::Tool {
            if let Some(last) = messages.last_mut() {
                if last.role == "user" && last.content.iter().all(|b| matches!(b, AnthropicContentBlock::ToolResult { .. })) {
                    last.content.extend(blocks);
                    continue;
                }
            }
        }
        messages.push(AnthropicMessage {
            role: role.to_string(),
            content: blocks,
        });
    }
    messages
}

fn non_streaming_to_content(response: AnthropicResponse) -> IContent {
    let blocks: Vec<ContentBlock> = response
        .content
        .into_iter()
        .map(|block| match block {
            AnthropicContentBlock::Text { text } => ContentBlock::text(text),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                ContentBlock::tool_call(ToolId::from_wire(&id), name, input)
            }
            AnthropicContentBlock::ToolResult { tool_use_id, content, is_error } => {
                ContentBlock::tool_response(
                    ToolId::from_wire(&tool_use_id),
                    content,
                    if is_error { Some("tool error".to_string()) } else { None },
                )
            }
        })
        .collect();
    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
        ..Default::default()
    });
    IContent::new(Speaker::Ai, blocks).with_metadata(crate::content::ContentMetadata {
        usage,
        runtime_id: None,
        provider_name: Some("anthropic".to_string()),
    })
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl AnthropicContentBlock {
    fn from_block(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text(t) => AnthropicContentBlock::Text { text: t.text.clone() },
            ContentBlock::Code(c) => AnthropicContentBlock::Text {
                text: match &c.language {
                    Some(lang) => format!("```{lang}\n{}\n```", c.code),
                    None => format!("```\n{}\n```", c.code),
                },
            },
            ContentBlock::ToolCall(t) => AnthropicContentBlock::ToolUse {
                id: t.id.to_anthropic(),
                name: t.name.clone(),
                input: t.parameters.clone(),
            },
            ContentBlock::ToolResponse(r) => AnthropicContentBlock::ToolResult {
                tool_use_id: r.call_id.to_anthropic(),
                content: r.result.clone(),
                is_error: r.error.is_some(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl AnthropicTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            input_schema: def.parameters.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)]
enum AnthropicStreamEvent {
    ContentBlockStart {
        #[allow(dead_code)]
        index: u32,
        content_block: StreamContentBlockStart,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: u32,
        delta: StreamDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)]
enum StreamContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)]
enum StreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

/// Drives the Anthropic SSE event sequence into canonical content, emitting
/// text deltas immediately and assembling tool-call arguments across
/// `content_block_delta` events until the matching `content_block_stop`.
fn drive_anthropic_stream(
    events: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<SseEvent, RuntimeError>> + Send>>,
) -> ChatCompletionStream {
    let stream = futures_util::stream::unfold(
        (events, None::<PendingToolUse>),
        |(mut events, mut pending)| async move {
            loop {
                let event = match events.next().await {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Some((Err(e), (events, pending))),
                    None => return None,
                };

                let parsed: AnthropicStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(_) => continue,
                };

                match parsed {
                    AnthropicStreamEvent::ContentBlockStart {
                        content_block: StreamContentBlockStart::ToolUse { id, name },
                        ..
                    } => {
                        pending = Some(PendingToolUse { id, name, input: String::new() });
                    }
                    AnthropicStreamEvent::ContentBlockStart {
                        content_block: StreamContentBlockStart::Text { text },
                        ..
                    } => {
                        if !text.is_empty() {
                            return Some((Ok(IContent::ai(text)), (events, pending)));
                        }
                    }
                    AnthropicStreamEvent::ContentBlockDelta {
                        delta: StreamDelta::TextDelta { text },
                        ..
                    } => {
                        return Some((Ok(IContent::ai(text)), (events, pending)));
                    }
                    AnthropicStreamEvent::ContentBlockDelta {
                        delta: StreamDelta::InputJsonDelta { partial_json },
                        ..
                    } => {
                        if let Some(current) = pending.as_mut() {
                            current.input.push_str(&partial_json);
                        }
                    }
                    AnthropicStreamEvent::ContentBlockStop { .. } => {
                        if let Some(current) = pending.take() {
                            let params = parse_streamed_tool_params(&current.input);
                            let item = IContent::new(
                                Speaker::Ai,
                                vec![ContentBlock::tool_call(
                                    ToolId::from_wire(&current.id),
                                    current.name,
                                    params,
                                )],
                            );
                            return Some((Ok(item), (events, pending)));
                        }
                    }
                    AnthropicStreamEvent::MessageDelta { usage: Some(usage) } => {
                        let item = IContent::new(Speaker::Ai, vec![]).with_metadata(
                            crate::content::ContentMetadata {
                                usage: Some(Usage {
                                    prompt_tokens: usage.input_tokens,
                                    completion_tokens: usage.output_tokens,
                                    total_tokens: usage.input_tokens + usage.output_tokens,
                                    ..Default::default()
                                }),
                                runtime_id: None,
                                provider_name: Some("anthropic".to_string()),
                            },
                        );
                        return Some((Ok(item), (events, pending)));
                    }
                    _ => continue,
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
    fn clear_state_evicts_both_auth_and_http_caches() {
        let provider = AnthropicProvider::new();
        provider
            .auth
            .resolve("rt-clear", "anthropic", Some("sk-test"), &[], None)
            .unwrap();
        provider
            .http
            .get_or_insert("rt-clear", "https://api.anthropic.com/v1", "sk-test", reqwest::Client::new);
        *provider.last_runtime_id.write().unwrap() = Some("rt-clear".to_string());
        assert_eq!(provider.http.len(), 1);

        provider.clear_state();

        assert_eq!(provider.http.len(), 0);
        let err = provider
            .auth
            .resolve("rt-clear", "anthropic", None, &[], None)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Auth { .. }));
    }

    #[test]
    fn oauth_prefix_wraps_first_message_content() {
        let content = vec![IContent::human("hi")];
        let messages = inject_oauth_system_prefix(content, "be nice");
        assert_eq!(messages.len(), 1);
        match &messages[0].content[0] {
            AnthropicContentBlock::Text { text } => {
                assert_eq!(text, "<system>be nice</system>");
            }
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn merges_consecutive_tool_responses_into_one_message() {
        let id_a = ToolId::new();
        let id_b = ToolId::new();
        let content = vec![
            IContent::human("hi"),
            IContent::new(
                Speaker::Ai,
                vec![ContentBlock::tool_call(id_a.clone(), "a", serde_json::json!({}))],
            ),
            IContent::new(
                Speaker::Tool,
                vec![ContentBlock::tool_response(id_a, serde_json::json!("ok"), None)],
            ),
            IContent::new(
                Speaker::Tool,
                vec![ContentBlock::tool_response(id_b, serde_json::json!("ok2"), None)],
            ),
        ];
        let messages = to_wire_messages(content);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content.len(), 2);
    }

    #[tokio::test]
    async fn drives_text_deltas_tool_call_and_usage() {
        use futures_util::StreamExt as _;

        let events = vec![
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search"}}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":1}"}}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"content_block_stop","index":1}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"type":"message_delta","usage":{"input_tokens":3,"output_tokens":2}}"#.into(),
            }),
        ];
        let stream = drive_anthropic_stream(Box::pin(futures_util::stream::iter(events)));
        let items: Vec<_> = stream.collect().await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 3);
        match &items[0].blocks[0] {
            ContentBlock::Text(t) => assert_eq!(t.text, "hi"),
            _ => panic!("expected text"),
        }
        match &items[1].blocks[0] {
            ContentBlock::ToolCall(t) => {
                assert_eq!(t.name, "search");
                assert_eq!(t.parameters, serde_json::json!({"q": 1}));
            }
            _ => panic!("expected tool call"),
        }
        let usage = items[2].metadata.as_ref().unwrap().usage.unwrap();
        assert_eq!(usage.total_tokens, 5);
    }
}
