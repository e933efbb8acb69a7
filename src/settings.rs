//! `SettingsService` and `Config` capability traits consumed by the runtime.
//!
//! Persistence, the on-disk settings file format, and profile import/export
//! beyond (de)serialization are a caller concern; this module only pins the
//! interface the provider manager and adapters call through.

use async_trait::async_trait;

use crate::error::RuntimeError;

/// Per-provider settings exposed by a `SettingsService`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_format: Option<String>,
}

/// Scoped key-value settings store consumed by the provider manager.
///
/// Implemented by the caller; this runtime only reads and writes through it.
#[async_trait]
pub trait SettingsService: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);

    fn get_provider_settings(&self, name: &str) -> ProviderSettings;
    fn set_provider_setting(&self, name: &str, key: &str, value: serde_json::Value);

    /// Serializes the full settings state for inclusion in a saved profile.
    fn export_for_profile(&self) -> serde_json::Value;
    /// Restores settings state from a loaded profile snapshot.
    fn import_from_profile(&self, snapshot: &serde_json::Value) -> Result<(), RuntimeError>;

    fn set_current_profile_name(&self, name: &str);
}

/// Ephemeral/session-scoped configuration accessor consumed by the provider
/// manager and adapters.
#[async_trait]
pub trait Config: Send + Sync {
    fn get_model(&self) -> Option<String>;
    fn get_provider(&self) -> Option<String>;

    fn get_ephemeral_settings(&self) -> std::collections::HashMap<String, serde_json::Value>;
    fn get_ephemeral_setting(&self, key: &str) -> Option<serde_json::Value>;
    fn set_ephemeral_setting(&self, key: &str, value: serde_json::Value);

    fn get_user_memory(&self) -> Option<String> {
        None
    }

    fn get_content_generator_config(&self) -> serde_json::Value;

    /// Re-runs the auth flow named by `auth_type`, e.g. after an OAuth token
    /// expires mid-session.
    async fn refresh_auth(&self, auth_type: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    #[derive(Default)]
    struct FakeSettings {
        values: RwLock<HashMap<String, serde_json::Value>>,
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
            serde_json::json!(self.values.read().unwrap().clone())
        }

        fn import_from_profile(&self, snapshot: &serde_json::Value) -> Result<(), RuntimeError> {
            let obj = snapshot
                .as_object()
                .ok_or_else(|| RuntimeError::Config("profile snapshot is not an object".into()))?;
            let mut values = self.values.write().unwrap();
            for (k, v) in obj {
                values.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        fn set_current_profile_name(&self, name: &str) {
            self.set("current-profile", serde_json::json!(name));
        }
    }

    #[test]
    fn get_set_round_trips() {
        let settings = FakeSettings::default();
        settings.set("active-provider", serde_json::json!("anthropic"));
        assert_eq!(settings.get("active-provider"), Some(serde_json::json!("anthropic")));
    }

    #[test]
    fn export_then_import_restores_values() {
        let settings = FakeSettings::default();
        settings.set("model", serde_json::json!("gpt-4o"));
        let snapshot = settings.export_for_profile();

        let other = FakeSettings::default();
        other.import_from_profile(&snapshot).unwrap();
        assert_eq!(other.get("model"), Some(serde_json::json!("gpt-4o")));
    }

    #[test]
    fn import_rejects_non_object_snapshot() {
        let settings = FakeSettings::default();
        assert!(settings.import_from_profile(&serde_json::json!([1, 2])).is_err());
    }
}
