//! Shared HTTP client cache keyed on `(runtime_key, base_url, auth_hash)`,
//! with bulk eviction of every client belonging to one runtime.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

/// Fallback base-url label when the caller supplies an empty string.
const DEFAULT_ENDPOINT: &str = "default-endpoint";

/// Strips trailing slashes and substitutes [`DEFAULT_ENDPOINT`] for an empty
/// URL, so `"https://api.example.com/"` and `"https://api.example.com"`
/// share a cache entry.
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_ENDPOINT.to_string()
    } else {
        trimmed.to_string()
    }
}

fn hash_auth_token(auth_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(auth_token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn compose_key(runtime_id: &str, base_url: &str, auth_token: &str) -> String {
    format!(
        "{runtime_id}|{}|{}",
        normalize_base_url(base_url),
        hash_auth_token(auth_token)
    )
}

/// Caches `reqwest::Client` instances across calls so repeated requests to
/// the same runtime/endpoint/credential reuse connection pooling, while
/// guaranteeing two different runtimes are never handed the same client.
#[derive(Default)]
pub struct HttpClientCache {
    clients: RwLock<HashMap<String, reqwest::Client>>,
    by_runtime: RwLock<HashMap<String, HashSet<String>>>,
}

impl HttpClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for this key, building and inserting one
    /// via `build` on a miss.
    pub fn get_or_insert(
        &self,
        runtime_id: &str,
        base_url: &str,
        auth_token: &str,
        build: impl FnOnce() -> reqwest::Client,
    ) -> reqwest::Client {
        let key = compose_key(runtime_id, base_url, auth_token);

        if let Some(client) = self.clients.read().unwrap().get(&key) {
            return client.clone();
        }

        let client = build();
        self.clients
            .write()
            .unwrap()
            .insert(key.clone(), client.clone());
        self.by_runtime
            .write()
            .unwrap()
            .entry(runtime_id.to_string())
            .or_default()
            .insert(key);
        client
    }

    /// Evicts every client cached under `runtime_id`.
    pub fn evict_runtime(&self, runtime_id: &str) {
        if let Some(keys) = self.by_runtime.write().unwrap().remove(runtime_id) {
            let mut clients = self.clients.write().unwrap();
            for key in keys {
                clients.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash_and_empty() {
        assert_eq!(
            normalize_base_url("https://api.example.com/"),
            normalize_base_url("https://api.example.com")
        );
        assert_eq!(normalize_base_url(""), DEFAULT_ENDPOINT);
    }

    #[test]
    fn same_key_returns_cached_client() {
        let cache = HttpClientCache::new();
        let mut builds = 0;
        let mut build = || {
            builds += 1;
            reqwest::Client::new()
        };
        cache.get_or_insert("rt-1", "https://a.example.com", "tok", &mut build);
        cache.get_or_insert("rt-1", "https://a.example.com", "tok", &mut build);
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_runtimes_never_share_a_client() {
        let cache = HttpClientCache::new();
        cache.get_or_insert("rt-1", "https://a.example.com", "tok", reqwest::Client::new);
        cache.get_or_insert("rt-2", "https://a.example.com", "tok", reqwest::Client::new);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evict_runtime_removes_only_its_own_clients() {
        let cache = HttpClientCache::new();
        cache.get_or_insert("rt-1", "https://a.example.com", "tok", reqwest::Client::new);
        cache.get_or_insert("rt-2", "https://a.example.com", "tok", reqwest::Client::new);
        cache.evict_runtime("rt-1");
        assert_eq!(cache.len(), 1);
    }
}
