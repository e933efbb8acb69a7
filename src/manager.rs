//! Provider manager: name→provider registry, active-provider state machine,
//! and the session-wide token accumulator.
//!
//! Every registered provider is wrapped in [`LoggingProvider`], a thin
//! decorator that taps the `usage_update` metadata flowing through a
//! provider's stream and folds it into the shared session accumulator — the
//! decorator is the only mutable state tied to a provider identity; the
//! provider implementations themselves stay immutable per call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::providers::{ChatCompletionProvider, ChatCompletionStream};
use crate::runtime_context::{NormalizedGenerateChatOptions, RuntimeContext};
use crate::settings::{Config, SettingsService};
use crate::telemetry;
use crate::types::response::Usage;
use crate::types::ProviderCapabilities;

const ACTIVE_PROVIDER_KEY: &str = "active-provider";
const RUNTIME_ID_KEY: &str = "runtime-id";
const FALLBACK_PROVIDER: &str = "openai";

/// Active-provider state machine: `unset` until a provider is registered as
/// default or explicitly activated.
#[derive(Debug, Clone, PartialEq)]
enum ActiveProvider {
    Unset,
    Active(String),
}

/// A provider registered with its capabilities captured at registration
/// time, wrapped for telemetry.
struct LoggingProvider {
    inner: Arc<dyn ChatCompletionProvider>,
    capabilities: ProviderCapabilities,
    session_tokens: Arc<RwLock<Usage>>,
}

#[async_trait]
impl ChatCompletionProvider for LoggingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn generate_chat_completion(
        &self,
        options: NormalizedGenerateChatOptions,
    ) -> Result<ChatCompletionStream, RuntimeError> {
        let provider = self.inner.name().to_string();
        let result = self.inner.generate_chat_completion(options).await;

        match result {
            Ok(stream) => {
                metrics::counter!(telemetry::REQUESTS_TOTAL,
                    "provider" => provider.clone(),
                    "operation" => "generate_chat_completion",
                    "status" => "ok",
                )
                .increment(1);

                let session_tokens = self.session_tokens.clone();
                let tapped = stream.inspect(move |item| {
                    if let Ok(content) = item {
                        if let Some(usage) = content.metadata.as_ref().and_then(|m| m.usage) {
                            let mut totals = session_tokens.write().unwrap();
                            *totals = totals.accumulate(&usage);
                        }
                    }
                });
                Ok(Box::pin(tapped))
            }
            Err(e) => {
                metrics::counter!(telemetry::REQUESTS_TOTAL,
                    "provider" => provider,
                    "operation" => "generate_chat_completion",
                    "status" => "error",
                )
                .increment(1);
                Err(e)
            }
        }
    }

    async fn get_models(&self) -> Result<Vec<String>, RuntimeError> {
        self.inner.get_models().await
    }

    fn clear_state(&self) {
        self.inner.clear_state();
    }
}

/// Hard-coded capability hints per well-known provider name, merged with
/// whatever the provider itself reports at registration.
fn hardcoded_hints(name: &str) -> ProviderCapabilities {
    match name {
        "anthropic" => ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            has_model_selection: true,
            has_api_key_config: true,
            has_base_url_config: true,
            supported_formats: vec!["anthropic".to_string()],
            ..Default::default()
        },
        "openai" => ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            has_model_selection: true,
            has_api_key_config: true,
            has_base_url_config: true,
            supported_formats: vec!["openai".to_string()],
            ..Default::default()
        },
        "gemini" => ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            has_model_selection: true,
            has_api_key_config: true,
            has_base_url_config: true,
            supported_formats: vec!["gemini".to_string()],
            ..Default::default()
        },
        _ => ProviderCapabilities::default(),
    }
}

/// Name→provider registry, active-provider bookkeeping, and the session
/// token accumulator. Owns no per-call state: every `generate_chat_completion`
/// call is driven through a freshly snapshotted [`RuntimeContext`].
pub struct ProviderManager {
    settings: Arc<dyn SettingsService>,
    config: Arc<dyn Config>,
    providers: RwLock<HashMap<String, Arc<LoggingProvider>>>,
    order: RwLock<Vec<String>>,
    active: RwLock<ActiveProvider>,
    server_tools_provider: RwLock<Option<String>>,
    session_tokens: Arc<RwLock<Usage>>,
}

impl ProviderManager {
    pub fn new(settings: Arc<dyn SettingsService>, config: Arc<dyn Config>) -> Self {
        Self {
            settings,
            config,
            providers: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            active: RwLock::new(ActiveProvider::Unset),
            server_tools_provider: RwLock::new(None),
            session_tokens: Arc::new(RwLock::new(Usage::default())),
        }
    }

    /// Registers a provider. If `is_default` is set and no provider is
    /// active yet, this provider becomes active immediately.
    pub fn register_provider(&self, provider: Arc<dyn ChatCompletionProvider>, is_default: bool) {
        let name = provider.name().to_string();
        let capabilities = hardcoded_hints(&name).merge(&provider.capabilities());
        let wrapped = Arc::new(LoggingProvider {
            inner: provider,
            capabilities,
            session_tokens: self.session_tokens.clone(),
        });

        let mut providers = self.providers.write().unwrap();
        if !providers.contains_key(&name) {
            self.order.write().unwrap().push(name.clone());
        }
        providers.insert(name.clone(), wrapped);
        drop(providers);

        let mut active = self.active.write().unwrap();
        if is_default && *active == ActiveProvider::Unset {
            *active = ActiveProvider::Active(name);
        }
    }

    /// Pins the distinguished server-tools provider (typically the
    /// Gemini-style adapter), whose auth state is not cleared on switches
    /// away from it.
    pub fn set_server_tools_provider(&self, name: impl Into<String>) {
        *self.server_tools_provider.write().unwrap() = Some(name.into());
    }

    pub fn get_server_tools_provider(&self) -> Option<Arc<dyn ChatCompletionProvider>> {
        let name = self.server_tools_provider.read().unwrap().clone()?;
        self.providers
            .read()
            .unwrap()
            .get(&name)
            .map(|p| p.clone() as Arc<dyn ChatCompletionProvider>)
    }

    /// Activates `name`. If a different provider was previously active and
    /// is not the pinned server-tools provider, its `clear_state()` is
    /// invoked first.
    pub fn set_active_provider(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.providers.read().unwrap().contains_key(name) {
            return Err(RuntimeError::Config(format!("unknown provider '{name}'")));
        }

        let previous = {
            let active = self.active.read().unwrap();
            match &*active {
                ActiveProvider::Active(p) => Some(p.clone()),
                ActiveProvider::Unset => None,
            }
        };

        if let Some(previous) = &previous {
            if previous != name {
                let server_tools = self.server_tools_provider.read().unwrap().clone();
                if server_tools.as_deref() != Some(previous.as_str()) {
                    if let Some(provider) = self.providers.read().unwrap().get(previous) {
                        provider.clear_state();
                    }
                }
            }
        }

        tracing::info!(from = previous.as_deref(), to = name, "provider switch");

        *self.active.write().unwrap() = ActiveProvider::Active(name.to_string());
        self.settings.set(ACTIVE_PROVIDER_KEY, serde_json::json!(name));
        Ok(())
    }

    pub fn clear_active_provider(&self) {
        *self.active.write().unwrap() = ActiveProvider::Unset;
    }

    /// Returns the active provider, resolving it via the fallback ladder
    /// (`settings.active-provider` → `config.get_provider()` → `"openai"` →
    /// first registered) if none is active. A name resolved by fallback is
    /// written back to settings before return.
    pub fn get_active_provider(&self) -> Result<Arc<dyn ChatCompletionProvider>, RuntimeError> {
        let current = {
            let active = self.active.read().unwrap();
            match &*active {
                ActiveProvider::Active(name) => Some(name.clone()),
                ActiveProvider::Unset => None,
            }
        };

        let name = match current {
            Some(name) => name,
            None => {
                let resolved = self.resolve_fallback()?;
                *self.active.write().unwrap() = ActiveProvider::Active(resolved.clone());
                self.settings
                    .set(ACTIVE_PROVIDER_KEY, serde_json::json!(resolved));
                resolved
            }
        };

        self.providers
            .read()
            .unwrap()
            .get(&name)
            .map(|p| p.clone() as Arc<dyn ChatCompletionProvider>)
            .ok_or_else(|| RuntimeError::Config(format!("active provider '{name}' is not registered")))
    }

    fn resolve_fallback(&self) -> Result<String, RuntimeError> {
        let providers = self.providers.read().unwrap();

        if let Some(name) = self
            .settings
            .get(ACTIVE_PROVIDER_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
        {
            if providers.contains_key(&name) {
                return Ok(name);
            }
        }

        if let Some(name) = self.config.get_provider() {
            if providers.contains_key(&name) {
                return Ok(name);
            }
        }

        if providers.contains_key(FALLBACK_PROVIDER) {
            return Ok(FALLBACK_PROVIDER.to_string());
        }

        self.order
            .read()
            .unwrap()
            .first()
            .cloned()
            .ok_or_else(|| RuntimeError::Config("no provider registered".into()))
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.order.read().unwrap().clone()
    }

    pub async fn get_available_models(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<String>, RuntimeError> {
        let provider = match name {
            Some(name) => self
                .providers
                .read()
                .unwrap()
                .get(name)
                .map(|p| p.clone() as Arc<dyn ChatCompletionProvider>)
                .ok_or_else(|| RuntimeError::Config(format!("unknown provider '{name}'")))?,
            None => self.get_active_provider()?,
        };
        provider.get_models().await
    }

    pub fn get_provider_capabilities(&self, name: Option<&str>) -> Option<ProviderCapabilities> {
        let providers = self.providers.read().unwrap();
        match name {
            Some(name) => providers.get(name).map(|p| p.capabilities.clone()),
            None => providers
                .values()
                .map(|p| p.capabilities.clone())
                .reduce(|acc, c| acc.merge(&c)),
        }
    }

    /// Compares two registered providers' capabilities.
    pub fn compare_providers(
        &self,
        a: &str,
        b: &str,
    ) -> Result<(ProviderCapabilities, ProviderCapabilities), RuntimeError> {
        let providers = self.providers.read().unwrap();
        let cap_a = providers
            .get(a)
            .map(|p| p.capabilities.clone())
            .ok_or_else(|| RuntimeError::Config(format!("unknown provider '{a}'")))?;
        let cap_b = providers
            .get(b)
            .map(|p| p.capabilities.clone())
            .ok_or_else(|| RuntimeError::Config(format!("unknown provider '{b}'")))?;
        Ok((cap_a, cap_b))
    }

    /// Folds `usage` into the session-wide accumulator. Also callable
    /// directly by consumers driving a provider outside the decorator's tap
    /// (e.g. a non-streaming call that only returns one usage metadata item).
    pub fn accumulate_session_tokens(&self, provider: &str, usage: Usage) {
        let mut totals = self.session_tokens.write().unwrap();
        *totals = totals.accumulate(&usage);
        drop(totals);

        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.to_string(),
            "direction" => "prompt",
        )
        .increment(u64::from(usage.prompt_tokens));
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.to_string(),
            "direction" => "completion",
        )
        .increment(u64::from(usage.completion_tokens));
    }

    pub fn get_session_token_usage(&self) -> Usage {
        *self.session_tokens.read().unwrap()
    }

    pub fn reset_session_token_usage(&self) {
        *self.session_tokens.write().unwrap() = Usage::default();
    }

    /// Builds a fresh [`RuntimeContext`] for one call, tagged with `source`
    /// and the current time. The base runtime identifier comes from a
    /// persisted `runtime-id` setting if present, else the active provider
    /// name; either missing is fatal.
    pub fn snapshot_runtime_context(&self, source: &str) -> Result<RuntimeContext, RuntimeError> {
        let provider_key = self
            .settings
            .get(ACTIVE_PROVIDER_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| self.config.get_provider());

        let Some(provider_key) = provider_key else {
            return Err(RuntimeError::MissingProviderRuntime {
                provider_key: "unknown".to_string(),
                missing_fields: vec![ACTIVE_PROVIDER_KEY.to_string(), "provider".to_string()],
                stage: "snapshot_runtime_context".to_string(),
                metadata: serde_json::json!({"source": source}),
            });
        };

        let base_runtime_id = self
            .settings
            .get(RUNTIME_ID_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| provider_key.clone());

        let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
        let runtime_id = format!("{base_runtime_id}-{suffix}");

        Ok(RuntimeContext::snapshot(Some(&runtime_id), None, None)
            .with_metadata("source", serde_json::json!(source))
            .with_metadata("timestamp", serde_json::json!(chrono::Utc::now().to_rfc3339())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::IContent;
    use crate::runtime_context::SettingsSnapshot;
    use crate::settings::ProviderSettings;
    use std::collections::HashMap as StdHashMap;
    use std::sync::RwLock as StdRwLock;

    #[derive(Default)]
    struct FakeSettings {
        values: StdRwLock<StdHashMap<String, serde_json::Value>>,
    }

    #[async_trait]
    impl SettingsService for FakeSettings {
        fn get(&self, key: &str) -> Option<serde_json::Value> {
            self.values.read().unwrap().get(key).cloned()
        }
        fn set(&self, key: &str, value: serde_json::Value) {
            self.values.write().unwrap().insert(key.to_string(), value);
        }
        fn get_provider_settings(&self, _name: &str) -> ProviderSettings {
            ProviderSettings::default()
        }
        fn set_provider_setting(&self, _name: &str, _key: &str, _value: serde_json::Value) {}
        fn export_for_profile(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn import_from_profile(&self, _snapshot: &serde_json::Value) -> Result<(), RuntimeError> {
            Ok(())
        }
        fn set_current_profile_name(&self, _name: &str) {}
    }

    #[derive(Default)]
    struct FakeConfig {
        provider: Option<String>,
    }

    #[async_trait]
    impl Config for FakeConfig {
        fn get_model(&self) -> Option<String> {
            None
        }
        fn get_provider(&self) -> Option<String> {
            self.provider.clone()
        }
        fn get_ephemeral_settings(&self) -> StdHashMap<String, serde_json::Value> {
            StdHashMap::new()
        }
        fn get_ephemeral_setting(&self, _key: &str) -> Option<serde_json::Value> {
            None
        }
        fn set_ephemeral_setting(&self, _key: &str, _value: serde_json::Value) {}
        fn get_content_generator_config(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn refresh_auth(&self, _auth_type: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    struct StubProvider {
        name: &'static str,
        usage: Option<Usage>,
        clear_state_calls: Arc<StdRwLock<u32>>,
    }

    #[async_trait]
    impl ChatCompletionProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        async fn generate_chat_completion(
            &self,
            _options: NormalizedGenerateChatOptions,
        ) -> Result<ChatCompletionStream, RuntimeError> {
            let mut item = IContent::ai("ok");
            if let Some(usage) = self.usage {
                item = item.with_metadata(crate::content::ContentMetadata {
                    usage: Some(usage),
                    runtime_id: None,
                    provider_name: Some(self.name.to_string()),
                });
            }
            Ok(Box::pin(futures_util::stream::once(async { Ok(item) })))
        }

        async fn get_models(&self) -> Result<Vec<String>, RuntimeError> {
            Ok(vec![format!("{}-model", self.name)])
        }

        fn clear_state(&self) {
            *self.clear_state_calls.write().unwrap() += 1;
        }
    }

    fn manager() -> (ProviderManager, Arc<StdRwLock<u32>>) {
        let settings = Arc::new(FakeSettings::default());
        let config = Arc::new(FakeConfig::default());
        let manager = ProviderManager::new(settings, config);
        let clear_calls = Arc::new(StdRwLock::new(0));
        manager.register_provider(
            Arc::new(StubProvider {
                name: "anthropic",
                usage: None,
                clear_state_calls: clear_calls.clone(),
            }),
            true,
        );
        manager.register_provider(
            Arc::new(StubProvider {
                name: "openai",
                usage: None,
                clear_state_calls: Arc::new(StdRwLock::new(0)),
            }),
            false,
        );
        (manager, clear_calls)
    }

    #[test]
    fn first_default_registration_becomes_active() {
        let (manager, _) = manager();
        let provider = manager.get_active_provider().unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn set_active_provider_rejects_unknown_name() {
        let (manager, _) = manager();
        let err = manager.set_active_provider("unknown").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn switching_away_clears_previous_state() {
        let (manager, clear_calls) = manager();
        manager.set_active_provider("openai").unwrap();
        assert_eq!(*clear_calls.read().unwrap(), 1);
    }

    #[test]
    fn server_tools_provider_is_exempt_from_clear_state() {
        let (manager, clear_calls) = manager();
        manager.set_server_tools_provider("anthropic");
        manager.set_active_provider("openai").unwrap();
        assert_eq!(*clear_calls.read().unwrap(), 0);
    }

    #[test]
    fn fallback_ladder_prefers_settings_then_config_then_openai() {
        let settings = Arc::new(FakeSettings::default());
        let config = Arc::new(FakeConfig {
            provider: Some("openai".to_string()),
        });
        let manager = ProviderManager::new(settings.clone(), config);
        manager.register_provider(
            Arc::new(StubProvider {
                name: "openai",
                usage: None,
                clear_state_calls: Arc::new(StdRwLock::new(0)),
            }),
            false,
        );
        manager.register_provider(
            Arc::new(StubProvider {
                name: "gemini",
                usage: None,
                clear_state_calls: Arc::new(StdRwLock::new(0)),
            }),
            false,
        );

        let provider = manager.get_active_provider().unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(
            settings.get(ACTIVE_PROVIDER_KEY),
            Some(serde_json::json!("openai"))
        );
    }

    #[tokio::test]
    async fn dispatch_taps_usage_into_session_accumulator() {
        let settings = Arc::new(FakeSettings::default());
        let config = Arc::new(FakeConfig::default());
        let manager = ProviderManager::new(settings, config);
        manager.register_provider(
            Arc::new(StubProvider {
                name: "anthropic",
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                    ..Default::default()
                }),
                clear_state_calls: Arc::new(StdRwLock::new(0)),
            }),
            true,
        );

        let provider = manager.get_active_provider().unwrap();
        let options = NormalizedGenerateChatOptions::new(
            vec![IContent::human("hi")],
            RuntimeContext::snapshot(None, None, None),
            SettingsSnapshot::default(),
        );
        let mut stream = provider.generate_chat_completion(options).await.unwrap();
        while stream.next().await.is_some() {}

        let totals = manager.get_session_token_usage();
        assert_eq!(totals.total_tokens, 5);
    }

    #[test]
    fn snapshot_runtime_context_fails_without_provider() {
        let settings = Arc::new(FakeSettings::default());
        let config = Arc::new(FakeConfig::default());
        let manager = ProviderManager::new(settings, config);
        let err = manager.snapshot_runtime_context("cli").unwrap_err();
        assert!(matches!(err, RuntimeError::MissingProviderRuntime { .. }));
    }

    #[test]
    fn snapshot_runtime_context_derives_from_active_provider() {
        let (manager, _) = manager();
        let ctx = manager.snapshot_runtime_context("cli").unwrap();
        assert!(ctx.runtime_id.starts_with("anthropic-"));
        assert_eq!(
            ctx.metadata.get("source"),
            Some(&serde_json::json!("cli"))
        );
    }

    #[test]
    fn accumulate_session_tokens_is_non_negative_clamped_and_commutative() {
        let (manager, _) = manager();
        manager.accumulate_session_tokens(
            "anthropic",
            Usage {
                prompt_tokens: 10,
                ..Default::default()
            },
        );
        manager.accumulate_session_tokens(
            "anthropic",
            Usage {
                prompt_tokens: 5,
                ..Default::default()
            },
        );
        assert_eq!(manager.get_session_token_usage().prompt_tokens, 15);
        manager.reset_session_token_usage();
        assert_eq!(manager.get_session_token_usage().prompt_tokens, 0);
    }
}
