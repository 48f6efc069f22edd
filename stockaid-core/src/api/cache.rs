//! The API cache: a single entry point in front of every registered provider.
//!
//! `api()` serves a valid cached entry when one exists; otherwise it waits on
//! the provider's rate limiter and failure backoff, resolves the credential,
//! fetches, validates the payload against the registered schema and stores
//! the new entry. Fetch errors are never cached.

use chrono::Utc;
use log::{debug, info, warn};
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use super::credentials::KeyChain;
use super::key::{CacheKey, Params};
use super::registry::{ProviderRegistry, ProviderSpec};
use super::store::{CacheEntry, EntryStatus, PersistentCache, StoreError};
use crate::error::ApiError;

pub struct ApiCache {
    registry: ProviderRegistry,
    /// `None` when the cache directory was unusable at construction.
    store: Option<PersistentCache>,
    /// Entries that could not be written to disk.
    fallback: Mutex<HashMap<CacheKey, CacheEntry>>,
    key_chain: KeyChain,
}

impl std::fmt::Debug for ApiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCache")
            .field("root", &self.store.as_ref().map(|s| s.root()))
            .field("registered", &self.registry.names().len())
            .field("key_chain", &self.key_chain)
            .finish()
    }
}

impl ApiCache {
    /// Create a cache persisting under `cache_path`. If the directory cannot
    /// be created or written the cache runs in memory only.
    pub fn new(cache_path: impl Into<PathBuf>, key_chain: KeyChain) -> Self {
        let path = cache_path.into();
        let store = match PersistentCache::open(&path) {
            Ok(store) => {
                info!("API cache at {}", path.display());
                Some(store)
            }
            Err(e) => {
                warn!(
                    "cannot use cache directory {}: {e}; caching in memory only",
                    path.display()
                );
                None
            }
        };
        Self::with_store(store, key_chain)
    }

    /// Create a cache that never touches disk.
    pub fn in_memory(key_chain: KeyChain) -> Self {
        Self::with_store(None, key_chain)
    }

    fn with_store(store: Option<PersistentCache>, key_chain: KeyChain) -> Self {
        Self {
            registry: ProviderRegistry::new(),
            store,
            fallback: Mutex::new(HashMap::new()),
            key_chain,
        }
    }

    pub fn register(&self, spec: ProviderSpec) -> Result<(), ApiError> {
        self.registry.register(spec)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// True iff entries are persisted to disk.
    pub fn can_cache(&self) -> bool {
        self.store.is_some()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.store.as_ref().map(PersistentCache::root)
    }

    /// Return the payload for `(provider, name, params)`, fetching on a miss.
    pub fn api(&self, provider: &str, name: &str, params: &Params) -> Result<DataFrame, ApiError> {
        self.entry(provider, name, params).map(|e| e.payload)
    }

    /// Like [`ApiCache::api`] but returns the whole entry.
    pub fn entry(
        &self,
        provider: &str,
        name: &str,
        params: &Params,
    ) -> Result<CacheEntry, ApiError> {
        let spec = self.registry.lookup(provider, name)?;
        let key = CacheKey::new(provider, name, params);

        if let Some(entry) = self.cached(&key) {
            debug!("cache hit {key}");
            return Ok(entry);
        }
        self.fetch_and_store(&spec, key, params)
    }

    /// Fetch anew regardless of any cached entry, and store the result.
    pub fn refresh(
        &self,
        provider: &str,
        name: &str,
        params: &Params,
    ) -> Result<CacheEntry, ApiError> {
        let spec = self.registry.lookup(provider, name)?;
        let key = CacheKey::new(provider, name, params);
        self.fetch_and_store(&spec, key, params)
    }

    /// Drop a cached entry, if any.
    pub fn invalidate(&self, provider: &str, name: &str, params: &Params) -> Result<(), ApiError> {
        let key = CacheKey::new(provider, name, params);
        self.fallback_map().remove(&key);
        if let Some(store) = &self.store {
            store
                .remove(&key)
                .map_err(|e| ApiError::Configuration(format!("remove {key}: {e}")))?;
        }
        Ok(())
    }

    /// Every persisted entry plus the in-memory fallback entries.
    pub fn status(&self) -> Result<Vec<EntryStatus>, StoreError> {
        let mut rows = match &self.store {
            Some(store) => store.status()?,
            None => Vec::new(),
        };
        rows.extend(self.fallback_map().values().map(|e| EntryStatus {
            key: e.key.clone(),
            fetched_at: e.fetched_at,
            ttl: e.ttl,
            rows: e.payload.height(),
            bytes: 0,
        }));
        Ok(rows)
    }

    /// Remove every entry, on disk and in memory. Returns how many entries
    /// were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut fallback = self.fallback_map();
        let in_memory = fallback.len();
        fallback.clear();
        let on_disk = match &self.store {
            Some(store) => store.clear()?,
            None => 0,
        };
        Ok(in_memory + on_disk)
    }

    fn fallback_map(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.fallback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A valid cached entry for `key`, from memory first, then disk.
    fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();
        {
            let mut fallback = self.fallback_map();
            match fallback.get(key) {
                Some(entry) if entry.is_valid_at(now) => return Some(entry.clone()),
                Some(_) => {
                    fallback.remove(key);
                }
                None => {}
            }
        }
        let entry = self.store.as_ref()?.get(key)?;
        if entry.is_valid_at(now) {
            Some(entry)
        } else {
            debug!("cache entry {key} expired at {}", entry.expires_at());
            None
        }
    }

    fn fetch_and_store(
        &self,
        spec: &ProviderSpec,
        key: CacheKey,
        params: &Params,
    ) -> Result<CacheEntry, ApiError> {
        let credential = if spec.policy.requires_credential {
            let secret = self.key_chain.get(&spec.provider).ok_or_else(|| {
                ApiError::credential(&spec.provider, "no credential in key chain")
            })?;
            Some(secret)
        } else {
            None
        };

        if let Some(throttle) = self.registry.throttle(&spec.provider) {
            if let Some(limiter) = &throttle.limiter {
                limiter.acquire();
            }
            throttle.backoff.wait();
        }

        info!("fetching {key}");
        let payload = match spec.fetcher.fetch(params, credential) {
            Ok(df) => df,
            Err(e) if e.is_transient() => {
                self.record_failure(&spec.provider, &e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.record_success(&spec.provider);

        spec.schema.validate(&payload)?;

        let entry = CacheEntry {
            key,
            fetched_at: Utc::now(),
            ttl: spec.policy.ttl,
            payload,
        };
        self.store_entry(&entry);
        Ok(entry)
    }

    fn store_entry(&self, entry: &CacheEntry) {
        let Some(store) = &self.store else {
            self.fallback_map().insert(entry.key.clone(), entry.clone());
            return;
        };
        match store.put(entry) {
            Ok(()) => {
                self.fallback_map().remove(&entry.key);
            }
            Err(e) => {
                warn!("could not persist {}: {e}; keeping it in memory", entry.key);
                self.fallback_map().insert(entry.key.clone(), entry.clone());
            }
        }
    }

    fn record_failure(&self, provider: &str, error: &ApiError) {
        if let Some(throttle) = self.registry.throttle(provider) {
            let hint = match error {
                ApiError::Fetch {
                    retry_after_secs, ..
                } => retry_after_secs.map(Duration::from_secs),
                _ => None,
            };
            throttle.backoff.record_failure(hint);
            warn!(
                "fetch from {provider} failed ({} consecutive): {error}",
                throttle.backoff.consecutive_failures()
            );
        }
    }

    fn record_success(&self, provider: &str) {
        if let Some(throttle) = self.registry.throttle(provider) {
            throttle.backoff.record_success();
        }
    }
}

static SHARED: OnceLock<ApiCache> = OnceLock::new();

/// Process-wide cache with the built-in providers registered.
///
/// The first call builds the instance; later calls return it and ignore
/// their arguments. Prefer constructing an [`ApiCache`] and sharing it via
/// `Arc` where the caller controls the lifecycle.
pub fn get_cache(cache_path: impl Into<PathBuf>, key_chain: KeyChain) -> &'static ApiCache {
    SHARED.get_or_init(|| {
        let cache = ApiCache::new(cache_path, key_chain);
        let transport = std::sync::Arc::new(crate::providers::ReqwestTransport::new());
        if let Err(e) = crate::providers::register_builtin(&cache, transport) {
            warn!("built-in provider registration failed: {e}");
        }
        cache
    })
}
