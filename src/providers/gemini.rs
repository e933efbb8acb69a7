//! Gemini-family wire adapter: query-param API key auth, role remapping,
//! and a streaming state machine over bare JSON chunks (Gemini's
//! `streamGenerateContent` endpoint emits a JSON array over SSE-like
//! chunking rather than named `event:`/`data:` lines, but the shared parser
//! still recovers each `data:` payload correctly).

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::common::{merged_custom_headers, send_and_classify, streaming_enabled};
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
use crate::tool_format::ensure_leading_human;
use crate::types::{ProviderCapabilities, ToolDefinition, Usage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini-family streaming chat adapter.
pub struct GeminiProvider {
    http: HttpClientCache,
    auth: AuthResolver,
    env_vars: Vec<&'static str>,
    retry_policy: RetryPolicy,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            http: HttpClientCache::new(),
            auth: AuthResolver::new(),
            env_vars: vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"],
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

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatCompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            max_tokens: Some(65_536),
            supported_formats: vec!["gemini".to_string()],
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
        let stream_enabled = streaming_enabled(&options.settings);

        let vars = default_variables(&model, self.name());
        let system_prompt = compose_prompt("{{MODEL}}", &vars, options.user_memory.as_deref());

        let content = ensure_leading_human(options.content.clone());
        let contents = to_wire_contents(content);

        let tools = options.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
            vec![GeminiToolGroup {
                function_declarations: tools.iter().map(GeminiFunctionDeclaration::from_definition).collect(),
            }]
        });

        let generation_config = GenerationConfig {
            temperature: options.model_params.temperature,
            top_p: options.model_params.top_p,
            top_k: options.model_params.top_k.map(|k| k as u32),
            max_output_tokens: options.model_params.max_tokens.map(|m| m as u32),
            stop_sequences: options.model_params.stop.clone(),
        };

        let headers = merged_custom_headers(&HashMap::new(), &HashMap::new(), &options.settings);

        let request_body = GeminiRequest {
            contents,
            system_instruction: Some(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text { text: system_prompt }],
            }),
            tools,
            generation_config,
        };

        let provider_name = self.name().to_string();
        let retry_policy = self.retry_policy.clone();

        let start_client = client.clone();
        let start_base_url = base_url.clone();
        let start_auth_token = auth_token.clone();
        let start_headers = headers.clone();
        let start_body = request_body.clone();
        let start_model = model.clone();

        let stream = retry_stream(retry_policy, provider_name, None, move || {
            let client = start_client.clone();
            let base_url = start_base_url.clone();
            let auth_token = start_auth_token.clone();
            let headers = start_headers.clone();
            let body = start_body.clone();
            let model = start_model.clone();
            async move {
                let verb = if stream_enabled {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                let mut url = format!("{base_url}/models/{model}:{verb}?key={auth_token}");
                if stream_enabled {
                    url.push_str("&alt=sse");
                }
                let mut request = client.post(url).json(&body);
                for (key, value) in &headers {
                    request = request.header(key, value);
                }

                let response = send_and_classify(request).await?;

                if stream_enabled {
                    let byte_stream = response.bytes_stream();
                    let events = parse_sse_stream(byte_stream);
                    Ok(drive_gemini_stream(events))
                } else {
                    let parsed: GeminiResponse = response
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
        Ok(vec!["gemini-2.5-pro".to_string(), "gemini-2.0-flash".to_string()])
    }
}

fn to_wire_contents(content: Vec<IContent>) -> Vec<GeminiContent> {
    content
        .into_iter()
        .map(|item| {
            let role = match item.speaker {
                Speaker::Human => "user",
                Speaker::Ai => "model",
                Speaker::Tool => "function",
            };
            let parts: Vec<GeminiPart> = item
                .blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(t) => GeminiPart::Text { text: t.text.clone() },
                    ContentBlock::Code(c) => GeminiPart::Text {
                        text: format!("```{}\n{}\n```", c.language.clone().unwrap_or_default(), c.code),
                    },
                    ContentBlock::ToolCall(t) => GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: t.name.clone(),
                            args: t.parameters.clone(),
                        },
                    },
                    ContentBlock::ToolResponse(r) => GeminiPart::FunctionResponse {
                        function_response: GeminiFunctionResponse {
                            name: r.call_id.bare().to_string(),
                            response: r.result.clone(),
                        },
                    },
                })
                .collect();
            GeminiContent { role: role.to_string(), parts }
        })
        .collect()
}

fn non_streaming_to_content(response: GeminiResponse) -> IContent {
    let mut blocks = Vec::new();
    if let Some(candidate) = response.candidates.into_iter().next() {
        for part in candidate.content.parts {
            append_block(&mut blocks, part);
        }
    }
    let usage = response.usage_metadata.map(|u| Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
        ..Default::default()
    });
    IContent::new(Speaker::Ai, blocks).with_metadata(crate::content::ContentMetadata {
        usage,
        runtime_id: None,
        provider_name: Some("gemini".to_string()),
    })
}

fn append_block(blocks: &mut Vec<ContentBlock>, part: GeminiPart) {
    match part {
        GeminiPart::Text { text } => {
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text));
            }
        }
        GeminiPart::FunctionCall { function_call } => {
            blocks.push(ContentBlock::tool_call(ToolId::new(), function_call.name, function_call.args));
        }
        GeminiPart::FunctionResponse { .. } => {}
    }
}

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiToolGroup>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum GeminiPart {
    Text { text: String },
    FunctionCall { function_call: GeminiFunctionCall },
    FunctionResponse { function_response: GeminiFunctionResponse },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiToolGroup {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl GeminiFunctionDeclaration {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topK")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopSequences")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason", default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

/// Drives Gemini's chunked JSON candidate stream. Each chunk mirrors the
/// non-streaming response shape with partial content; a fresh [`ToolId`] is
/// synthesized for each function-call part, since Gemini never supplies a
/// call identifier of its own.
fn drive_gemini_stream(
    events: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<SseEvent, RuntimeError>> + Send>>,
) -> ChatCompletionStream {
    let stream = futures_util::stream::unfold(events, |mut events| async move {
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Some((Err(e), events)),
                None => return None,
            };

            let chunk: GeminiResponse = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };

            let mut blocks = Vec::new();
            if let Some(candidate) = chunk.candidates.into_iter().next() {
                for part in candidate.content.parts {
                    append_block(&mut blocks, part);
                }
            }

            let usage = chunk.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
                ..Default::default()
            });

            if blocks.is_empty() && usage.is_none() {
                continue;
            }

            let item = IContent::new(Speaker::Ai, blocks).with_metadata(crate::content::ContentMetadata {
                usage,
                runtime_id: None,
                provider_name: Some("gemini".to_string()),
            });
            return Some((Ok(item), events));
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_contents_maps_roles() {
        let content = vec![
            IContent::human("hi"),
            IContent::ai("hello"),
            IContent::new(
                Speaker::Tool,
                vec![ContentBlock::tool_response(ToolId::new(), serde_json::json!("ok"), None)],
            ),
        ];
        let wire = to_wire_contents(content);
        assert_eq!(wire[0].role, "user");
        assert_eq!(wire[1].role, "model");
        assert_eq!(wire[2].role, "function");
    }

    #[tokio::test]
    async fn drives_text_and_function_call_chunks() {
        use futures_util::StreamExt as _;

        let events = vec![
            Ok(SseEvent {
                event: None,
                data: r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hi"}]}}]}"#.into(),
            }),
            Ok(SseEvent {
                event: None,
                data: r#"{"candidates":[{"content":{"role":"model","parts":[{"functionCall":{"name":"search","args":{"q":1}}}]}}]}"#.into(),
            }),
        ];
        let stream = drive_gemini_stream(Box::pin(futures_util::stream::iter(events)));
        let items: Vec<_> = stream.collect().await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
        match &items[1].blocks[0] {
            ContentBlock::ToolCall(t) => assert_eq!(t.name, "search"),
            _ => panic!("expected tool call"),
        }
    }
}
