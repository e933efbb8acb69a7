//! Cross-provider conversion rules shared by every wire adapter: tool-format
//! auto-detection, strict-pairing orphan pruning, and placeholder insertion.

use crate::content::{ContentBlock, IContent, Speaker};

/// Which family of tool-call wire conventions a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    Anthropic,
    OpenAi,
    Gemini,
}

impl ToolFormat {
    /// Detects the wire format from a provider hint first, falling back to
    /// sniffing the model name for family-identifying substrings.
    pub fn detect(model: &str, provider_hint: Option<&str>) -> ToolFormat {
        if let Some(hint) = provider_hint {
            match hint.to_lowercase().as_str() {
                "anthropic" => return ToolFormat::Anthropic,
                "gemini" | "google" => return ToolFormat::Gemini,
                "openai" | "chat-completions" | "responses" => return ToolFormat::OpenAi,
                _ => {}
            }
        }
        let lower = model.to_lowercase();
        if lower.contains("claude") {
            ToolFormat::Anthropic
        } else if lower.contains("gemini") {
            ToolFormat::Gemini
        } else {
            ToolFormat::OpenAi
        }
    }
}

/// Removes `ToolResponse` blocks whose `call_id` was never emitted as a
/// `ToolCall` in the same sequence, then drops any item left with no blocks.
///
/// Mirrors strict-pairing providers (Anthropic-family in particular), which
/// reject a tool_result with no matching tool_use in the same request.
pub fn prune_orphan_tool_responses(items: Vec<IContent>) -> Vec<IContent> {
    let emitted: std::collections::HashSet<_> = items
        .iter()
        .flat_map(|item| item.tool_calls().map(|t| t.id.clone()))
        .collect();

    items
        .into_iter()
        .filter_map(|mut item| {
            item.blocks.retain(|block| match block {
                ContentBlock::ToolResponse(r) => emitted.contains(&r.call_id),
                _ => true,
            });
            if item.blocks.is_empty() {
                None
            } else {
                Some(item)
            }
        })
        .collect()
}

/// Prepends a placeholder human turn when the sequence doesn't already open
/// with one, as strict-pairing providers require the first turn to be from
/// the human speaker.
///
/// An empty sequence gets `"Hello"`; a non-empty sequence that opens with an
/// `ai`/`tool` turn gets `"Continue the conversation"`.
pub fn ensure_leading_human(mut items: Vec<IContent>) -> Vec<IContent> {
    let needs_placeholder = !matches!(items.first().map(|i| i.speaker), Some(Speaker::Human));
    if needs_placeholder {
        let text = if items.is_empty() {
            "Hello"
        } else {
            "Continue the conversation"
        };
        items.insert(0, IContent::human(text));
    }
    items
}

/// Normalizes a tool's JSON-schema parameters to always be a JSON object,
/// substituting an empty object when the schema is missing or malformed —
/// every provider wire format requires an object here even when a tool
/// declares no parameters.
pub fn normalize_tool_parameters(parameters: &serde_json::Value) -> serde_json::Value {
    if parameters.is_object() {
        parameters.clone()
    } else {
        serde_json::json!({})
    }
}

/// Parses a streamed tool-call argument buffer (accumulated incrementally
/// across delta chunks) into its JSON object. A malformed or non-object
/// result is logged and swallowed rather than surfaced as a content block,
/// since partial/garbled tool arguments are a model quality issue, not a
/// transport error.
pub fn parse_streamed_tool_params(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(other) => {
            tracing::warn!(raw = %raw, parsed = %other, "tool call arguments did not parse to an object");
            serde_json::json!({})
        }
        Err(err) => {
            tracing::warn!(raw = %raw, error = %err, "failed to parse tool call arguments");
            serde_json::json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ToolId;

    #[test]
    fn detect_prefers_provider_hint() {
        assert_eq!(
            ToolFormat::detect("gpt-4o", Some("anthropic")),
            ToolFormat::Anthropic
        );
    }

    #[test]
    fn detect_falls_back_to_model_name() {
        assert_eq!(ToolFormat::detect("claude-sonnet-4", None), ToolFormat::Anthropic);
        assert_eq!(ToolFormat::detect("gemini-2.0-flash", None), ToolFormat::Gemini);
        assert_eq!(ToolFormat::detect("gpt-4o", None), ToolFormat::OpenAi);
    }

    #[test]
    fn prune_drops_orphan_tool_response_and_empty_item() {
        let id = ToolId::new();
        let items = vec![
            IContent::new(
                Speaker::Tool,
                vec![ContentBlock::tool_response(
                    ToolId::from_wire("never-emitted"),
                    serde_json::json!({}),
                    None,
                )],
            ),
            IContent::human("hi"),
            IContent::new(
                Speaker::Ai,
                vec![ContentBlock::tool_call(id.clone(), "search", serde_json::json!({}))],
            ),
            IContent::new(
                Speaker::Tool,
                vec![ContentBlock::tool_response(id, serde_json::json!({"ok": true}), None)],
            ),
        ];
        let pruned = prune_orphan_tool_responses(items);
        assert_eq!(pruned.len(), 3);
        assert!(matches!(pruned[0].speaker, Speaker::Human));
    }

    #[test]
    fn ensure_leading_human_on_empty_sequence() {
        let result = ensure_leading_human(vec![]);
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0].speaker, Speaker::Human));
    }

    #[test]
    fn ensure_leading_human_prepends_continue_when_ai_first() {
        let items = vec![IContent::ai("hello there")];
        let result = ensure_leading_human(items);
        assert_eq!(result.len(), 2);
        match &result[0].blocks[0] {
            ContentBlock::Text(t) => assert_eq!(t.text, "Continue the conversation"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn ensure_leading_human_is_noop_when_already_human() {
        let items = vec![IContent::human("hi")];
        let result = ensure_leading_human(items.clone());
        assert_eq!(result, items);
    }

    #[test]
    fn parse_streamed_tool_params_accepts_object() {
        let value = parse_streamed_tool_params(r#"{"path": "a.rs"}"#);
        assert_eq!(value, serde_json::json!({"path": "a.rs"}));
    }

    #[test]
    fn parse_streamed_tool_params_falls_back_on_garbage() {
        assert_eq!(parse_streamed_tool_params("{not json"), serde_json::json!({}));
        assert_eq!(parse_streamed_tool_params("42"), serde_json::json!({}));
        assert_eq!(parse_streamed_tool_params(""), serde_json::json!({}));
    }
}
