//! Tool schema types shared by every provider's request wire format.

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};

/// Tool definition advertised to the model (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Optional cache control directive (e.g. `{"type": "ephemeral"}` for Anthropic prompt caching).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<serde_json::Value>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            cache_control: None,
        }
    }

    #[must_use]
    pub fn with_cache_control(mut self, cache_control: serde_json::Value) -> Self {
        self.cache_control = Some(cache_control);
        self
    }
}

/// Convert from OpenAI-style tool JSON (`{"type":"function","function":{...}}`).
impl TryFrom<&serde_json::Value> for ToolDefinition {
    type Error = RuntimeError;

    fn try_from(value: &serde_json::Value) -> std::result::Result<Self, Self::Error> {
        let function = value
            .get("function")
            .ok_or_else(|| RuntimeError::Input("missing 'function' field".into()))?;

        Ok(Self {
            name: function["name"]
                .as_str()
                .ok_or_else(|| RuntimeError::Input("missing function name".into()))?
                .to_string(),
            description: function["description"].as_str().unwrap_or("").to_string(),
            parameters: function
                .get("parameters")
                .cloned()
                .unwrap_or(serde_json::json!({})),
            cache_control: value.get("cache_control").cloned(),
        })
    }
}

/// Tool choice configuration sent alongside a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Function {
        name: String,
    },
}
