//! Credential resolution: explicit key, then environment variables, then
//! OAuth — cached per runtime, never shared across runtimes.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::RuntimeError;

/// Supplies an OAuth-refreshed bearer token, the last rung of the
/// resolution ladder.
pub trait OAuthTokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Resolves and caches credentials per `runtime_id`.
///
/// A cache hit never crosses runtime boundaries: two calls with different
/// `runtime_id`s always resolve (and may cache) independently, matching the
/// HTTP client cache's own per-runtime isolation.
#[derive(Default)]
pub struct AuthResolver {
    cache: RwLock<HashMap<String, String>>,
}

impl AuthResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a credential for `runtime_id`/`provider_name`, trying in
    /// order: an explicit key, the given environment variables (first
    /// non-empty wins), then an OAuth token source. Returns the cached value
    /// on a repeat call for the same `runtime_id` without re-resolving.
    pub fn resolve(
        &self,
        runtime_id: &str,
        provider_name: &str,
        explicit_key: Option<&str>,
        env_vars: &[&str],
        oauth: Option<&dyn OAuthTokenSource>,
    ) -> Result<String, RuntimeError> {
        if let Some(cached) = self.cache.read().unwrap().get(runtime_id) {
            return Ok(cached.clone());
        }

        let resolved = explicit_key
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| {
                env_vars
                    .iter()
                    .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
            })
            .or_else(|| oauth.and_then(|o| o.token()));

        match resolved {
            Some(token) => {
                self.cache
                    .write()
                    .unwrap()
                    .insert(runtime_id.to_string(), token.clone());
                Ok(token)
            }
            None => Err(RuntimeError::Auth {
                provider_name: provider_name.to_string(),
                hint: format!(
                    "no credential found; set one of {env_vars:?} or configure an API key"
                ),
            }),
        }
    }

    /// Invalidates the cached credential for one runtime.
    pub fn clear_auth_cache(&self, runtime_id: &str) {
        self.cache.write().unwrap().remove(runtime_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_wins_over_env() {
        let resolver = AuthResolver::new();
        let token = resolver
            .resolve("rt-1", "openai", Some("sk-explicit"), &["OPENAI_API_KEY"], None)
            .unwrap();
        assert_eq!(token, "sk-explicit");
    }

    #[test]
    fn caches_per_runtime_id_independently() {
        let resolver = AuthResolver::new();
        resolver
            .resolve("rt-a", "openai", Some("key-a"), &[], None)
            .unwrap();
        let err = resolver.resolve("rt-b", "openai", None, &[], None);
        assert!(err.is_err());
    }

    #[test]
    fn clear_auth_cache_forces_re_resolution() {
        let resolver = AuthResolver::new();
        resolver
            .resolve("rt-1", "openai", Some("key-1"), &[], None)
            .unwrap();
        resolver.clear_auth_cache("rt-1");
        let err = resolver.resolve("rt-1", "openai", None, &[], None);
        assert!(err.is_err());
    }

    #[test]
    fn no_credential_produces_auth_error_with_hint() {
        let resolver = AuthResolver::new();
        let err = resolver
            .resolve("rt-1", "anthropic", None, &["ANTHROPIC_API_KEY_UNUSED_XYZ"], None)
            .unwrap_err();
        match err {
            RuntimeError::Auth { provider_name, .. } => assert_eq!(provider_name, "anthropic"),
            _ => panic!("expected Auth error"),
        }
    }
}
