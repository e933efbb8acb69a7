//! Provider capability descriptor, captured at registration time.

use serde::{Deserialize, Serialize};

/// What a registered provider supports, captured once at registration and
/// surfaced back to callers via `ProviderManager::get_provider_capabilities`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub max_tokens: Option<u32>,
    pub supported_formats: Vec<String>,
    pub has_model_selection: bool,
    pub has_api_key_config: bool,
    pub has_base_url_config: bool,
    pub supports_paid_mode: bool,
}

impl ProviderCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine two descriptors using OR logic on every boolean flag and the
    /// union of supported formats, keeping the larger `max_tokens`.
    pub fn merge(&self, other: &Self) -> Self {
        let mut formats = self.supported_formats.clone();
        for f in &other.supported_formats {
            if !formats.contains(f) {
                formats.push(f.clone());
            }
        }
        Self {
            supports_streaming: self.supports_streaming || other.supports_streaming,
            supports_tools: self.supports_tools || other.supports_tools,
            supports_vision: self.supports_vision || other.supports_vision,
            max_tokens: match (self.max_tokens, other.max_tokens) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            supported_formats: formats,
            has_model_selection: self.has_model_selection || other.has_model_selection,
            has_api_key_config: self.has_api_key_config || other.has_api_key_config,
            has_base_url_config: self.has_base_url_config || other.has_base_url_config,
            supports_paid_mode: self.supports_paid_mode || other.supports_paid_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_formats_and_ors_flags() {
        let a = ProviderCapabilities {
            supports_streaming: true,
            supported_formats: vec!["anthropic".into()],
            max_tokens: Some(4096),
            ..Default::default()
        };
        let b = ProviderCapabilities {
            supports_tools: true,
            supported_formats: vec!["openai".into(), "anthropic".into()],
            max_tokens: Some(8192),
            ..Default::default()
        };
        let merged = a.merge(&b);
        assert!(merged.supports_streaming);
        assert!(merged.supports_tools);
        assert_eq!(merged.supported_formats.len(), 2);
        assert_eq!(merged.max_tokens, Some(8192));
    }
}
