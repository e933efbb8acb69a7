//! Persisted profile: a named snapshot of provider, model, model params, and
//! ephemeral settings, round-tripped through JSON on disk.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Environment variable overriding the profile directory, mirroring
/// [`crate::prompt::PROMPTS_DIR_ENV`]'s resolution shape.
pub const PROFILES_DIR_ENV: &str = "LLXPRT_PROFILES_DIR";

const PROFILE_VERSION: u32 = 1;

/// Generation-relevant model parameters carried in a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileModelParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "max_tokens")]
    pub max_tokens: Option<usize>,
}

/// A named, persisted configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub version: u32,
    pub provider: String,
    pub model: String,
    #[serde(default, rename = "modelParams")]
    pub model_params: ProfileModelParams,
    #[serde(default, rename = "ephemeralSettings")]
    pub ephemeral_settings: HashMap<String, serde_json::Value>,
}

impl Profile {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            version: PROFILE_VERSION,
            provider: provider.into(),
            model: model.into(),
            model_params: ProfileModelParams::default(),
            ephemeral_settings: HashMap::new(),
        }
    }
}

/// Resolves the profile directory: `LLXPRT_PROFILES_DIR` if set, otherwise
/// `~/.llxprt/profiles`.
pub fn profiles_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(PROFILES_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".llxprt")
        .join("profiles")
}

fn profile_path(name: &str) -> PathBuf {
    profiles_dir().join(format!("{name}.json"))
}

/// Serializes `profile` to `<profilesDir>/<name>.json`, creating the
/// directory if it doesn't exist.
pub fn save_profile(name: &str, profile: &Profile) -> Result<(), RuntimeError> {
    let dir = profiles_dir();
    std::fs::create_dir_all(&dir).map_err(|e| {
        RuntimeError::Config(format!("profile '{name}': failed to create profiles directory: {e}"))
    })?;

    let json = serde_json::to_string_pretty(profile).map_err(|e| {
        RuntimeError::Config(format!("profile '{name}': failed to serialize: {e}"))
    })?;

    std::fs::write(profile_path(name), json)
        .map_err(|e| RuntimeError::Config(format!("profile '{name}': failed to write: {e}")))
}

/// Loads and parses `<profilesDir>/<name>.json`.
pub fn load_profile(name: &str) -> Result<Profile, RuntimeError> {
    let path = profile_path(name);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        RuntimeError::Config(format!("profile '{name}': failed to read {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        RuntimeError::Config(format!("profile '{name}': invalid profile JSON: {e}"))
    })
}
