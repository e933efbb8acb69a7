//! Canonical content model (`IContent`) shared by every provider family, and
//! the canonical tool-ID format providers' wire identifiers round-trip
//! through.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::types::response::Usage;

/// Who produced a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Ai,
    Tool,
}

/// A plain text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// A fenced code block, with an optional declared language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub code: String,
}

/// A request from the model to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolId,
    pub name: String,
    pub parameters: serde_json::Value,
}

/// The result of executing a tool call, correlated back by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponseBlock {
    pub call_id: ToolId,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One ordered unit of content within an [`IContent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Code(CodeBlock),
    ToolCall(ToolCallBlock),
    ToolResponse(ToolResponseBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock { text: text.into() })
    }

    pub fn tool_call(id: ToolId, name: impl Into<String>, parameters: serde_json::Value) -> Self {
        ContentBlock::ToolCall(ToolCallBlock {
            id,
            name: name.into(),
            parameters,
        })
    }

    pub fn tool_response(
        call_id: ToolId,
        result: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        ContentBlock::ToolResponse(ToolResponseBlock {
            call_id,
            result,
            error,
        })
    }
}

/// Out-of-band data attached to an [`IContent`] item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

/// One turn of canonical conversation content, normalized from whichever
/// upstream wire format produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IContent {
    pub speaker: Speaker,
    pub blocks: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ContentMetadata>,
}

impl IContent {
    pub fn new(speaker: Speaker, blocks: Vec<ContentBlock>) -> Self {
        Self {
            speaker,
            blocks,
            metadata: None,
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Speaker::Human, vec![ContentBlock::text(text)])
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(Speaker::Ai, vec![ContentBlock::text(text)])
    }

    pub fn with_metadata(mut self, metadata: ContentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// All `ToolCallBlock`s present in this item, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallBlock> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(t) => Some(t),
            _ => None,
        })
    }

    /// All `ToolResponseBlock`s present in this item, in order.
    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResponseBlock> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolResponse(t) => Some(t),
            _ => None,
        })
    }
}

/// Canonical tool-call identifier, always stored internally as
/// `hist_tool_<uuid>`.
///
/// Wire adapters rewrite to/from provider-specific prefixes
/// (`toolu_<uuid>` for Anthropic, `call_<uuid>` for OpenAI-style APIs);
/// an unrecognized prefix is treated as a bare UUID and the canonical
/// prefix is simply prepended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

const CANONICAL_PREFIX: &str = "hist_tool_";
const ANTHROPIC_PREFIX: &str = "toolu_";
const OPENAI_PREFIX: &str = "call_";

impl ToolId {
    /// Generates a fresh canonical tool ID.
    pub fn new() -> Self {
        Self(format!("{CANONICAL_PREFIX}{}", Uuid::new_v4()))
    }

    /// Parses a string already in canonical form.
    pub fn from_canonical(s: impl Into<String>) -> Result<Self, RuntimeError> {
        let s = s.into();
        if s.starts_with(CANONICAL_PREFIX) {
            Ok(Self(s))
        } else {
            Err(RuntimeError::Input(format!(
                "not a canonical tool id: {s}"
            )))
        }
    }

    /// Parses any wire-format tool ID (`toolu_*`, `call_*`, canonical, or a
    /// bare UUID) into canonical form.
    pub fn from_wire(s: &str) -> Self {
        let bare = s
            .strip_prefix(CANONICAL_PREFIX)
            .or_else(|| s.strip_prefix(ANTHROPIC_PREFIX))
            .or_else(|| s.strip_prefix(OPENAI_PREFIX))
            .unwrap_or(s);
        Self(format!("{CANONICAL_PREFIX}{bare}"))
    }

    /// The bare UUID component, without any prefix.
    pub fn bare(&self) -> &str {
        self.0
            .strip_prefix(CANONICAL_PREFIX)
            .unwrap_or(self.0.as_str())
    }

    pub fn as_canonical(&self) -> &str {
        &self.0
    }

    pub fn to_anthropic(&self) -> String {
        format!("{ANTHROPIC_PREFIX}{}", self.bare())
    }

    pub fn to_openai(&self) -> String {
        format!("{OPENAI_PREFIX}{}", self.bare())
    }
}

impl Default for ToolId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
