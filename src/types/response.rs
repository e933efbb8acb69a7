//! Usage accounting and finish-reason types shared across provider families.

use serde::{Deserialize, Serialize};

/// Token usage statistics, reported by providers on a `usage_update` output
/// and accumulated into session totals by the provider manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_tokens: Option<u32>,
}

impl Usage {
    /// Commutative, associative, non-negative-clamped accumulation, matching
    /// the session token accumulator's required algebra.
    pub fn accumulate(&self, other: &Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
            cache_tokens: add_optional(self.cache_tokens, other.cache_tokens),
            tool_tokens: add_optional(self.tool_tokens, other.tool_tokens),
            thought_tokens: add_optional(self.thought_tokens, other.thought_tokens),
        }
    }
}

fn add_optional(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}
