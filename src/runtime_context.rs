//! Per-call runtime identity and settings snapshot.
//!
//! Every call into a provider carries an immutable bundle built fresh from
//! the caller's current state rather than an ambient "active provider"
//! singleton — this is what lets two concurrent calls against different
//! runtimes never share an HTTP client or auth cache entry.

use std::collections::HashMap;

use uuid::Uuid;

use crate::content::IContent;
use crate::types::{ChatOptions, ToolDefinition};

/// Sentinel used when no runtime identity can be derived at all.
pub const DEFAULT_RUNTIME_SENTINEL: &str = "default-runtime";

/// Identity of the call site issuing a request, used to key per-runtime
/// caches (HTTP clients, auth tokens) so they are never shared across
/// unrelated runtimes.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeContext {
    pub runtime_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RuntimeContext {
    /// Builds a context for a fresh call, deriving `runtime_id` from the
    /// first of: an explicit runtime id, a `metadata.runtimeId`, a
    /// `call-id` found in the settings snapshot, or else a sentinel
    /// suffixed with a random component so unrelated anonymous calls still
    /// don't collide in the cache.
    pub fn snapshot(
        explicit_runtime_id: Option<&str>,
        metadata_runtime_id: Option<&str>,
        settings_call_id: Option<&str>,
    ) -> Self {
        let runtime_id = explicit_runtime_id
            .or(metadata_runtime_id)
            .or(settings_call_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{DEFAULT_RUNTIME_SENTINEL}-{}", Uuid::new_v4()));
        Self {
            runtime_id,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Immutable snapshot of the settings relevant to one call, replacing the
/// teacher's ambient mutable config lookups.
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    pub active_provider: Option<String>,
    pub ephemeral: HashMap<String, serde_json::Value>,
}

impl SettingsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ephemeral(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.ephemeral.insert(key.into(), value);
        self
    }

    pub fn ephemeral_str(&self, key: &str) -> Option<&str> {
        self.ephemeral.get(key).and_then(|v| v.as_str())
    }

    /// Custom headers declared in the `"custom-headers"` ephemeral setting,
    /// if any, as a flat string map.
    pub fn custom_headers(&self) -> HashMap<String, String> {
        self.ephemeral
            .get("custom-headers")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Call parameters resolved from settings/config at the call boundary, kept
/// separate from `model_params` because they govern transport (where to
/// connect, how to authenticate) rather than generation behavior.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCallParams {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

/// The complete, immutable bundle a provider receives for one
/// `generate_chat_completion` call.
#[derive(Debug, Clone)]
pub struct NormalizedGenerateChatOptions {
    pub content: Vec<IContent>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub model_params: ChatOptions,
    pub runtime: RuntimeContext,
    pub settings: SettingsSnapshot,
    pub resolved: ResolvedCallParams,
    pub user_memory: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NormalizedGenerateChatOptions {
    pub fn new(content: Vec<IContent>, runtime: RuntimeContext, settings: SettingsSnapshot) -> Self {
        Self {
            content,
            tools: None,
            model_params: ChatOptions::default(),
            runtime,
            settings,
            resolved: ResolvedCallParams::default(),
            user_memory: None,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_model_params(mut self, model_params: ChatOptions) -> Self {
        self.model_params = model_params;
        self
    }

    #[must_use]
    pub fn with_resolved(mut self, resolved: ResolvedCallParams) -> Self {
        self.resolved = resolved;
        self
    }

    #[must_use]
    pub fn with_user_memory(mut self, user_memory: impl Into<String>) -> Self {
        self.user_memory = Some(user_memory.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
