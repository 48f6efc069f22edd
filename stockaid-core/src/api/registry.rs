//! Provider registry: maps `(provider, name)` to a fetcher, its output schema
//! and its cache/throttle policy.
//!
//! Every provider gets exactly one [`RateLimiter`] (if any API of the provider
//! declares a rate limit) and one [`FailureBackoff`], shared by all of its APIs.

use log::debug;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::backoff::FailureBackoff;
use super::key::Params;
use super::limiter::{RateLimit, RateLimiter};
use crate::error::ApiError;
use crate::table::TableSchema;

/// Something that can retrieve one API's data.
pub trait Fetcher: Send + Sync {
    /// Fetch a fresh payload. `credential` is `Some` whenever the API's
    /// policy requires one.
    fn fetch(&self, params: &Params, credential: Option<&str>) -> Result<DataFrame, ApiError>;
}

impl<F> Fetcher for F
where
    F: Fn(&Params, Option<&str>) -> Result<DataFrame, ApiError> + Send + Sync,
{
    fn fetch(&self, params: &Params, credential: Option<&str>) -> Result<DataFrame, ApiError> {
        self(params, credential)
    }
}

/// How long results live and how fast the provider may be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// `None` inherits the provider's limit, if any.
    pub rate_limit: Option<RateLimit>,
    pub requires_credential: bool,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            rate_limit: None,
            requires_credential: false,
        }
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_credential(mut self) -> Self {
        self.requires_credential = true;
        self
    }
}

/// One registered API.
#[derive(Clone)]
pub struct ProviderSpec {
    pub provider: String,
    pub name: String,
    pub fetcher: Arc<dyn Fetcher>,
    pub schema: TableSchema,
    pub policy: CachePolicy,
}

impl ProviderSpec {
    pub fn new(
        provider: impl Into<String>,
        name: impl Into<String>,
        fetcher: impl Fetcher + 'static,
        policy: CachePolicy,
    ) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
            fetcher: Arc::new(fetcher),
            schema: TableSchema::any(),
            policy,
        }
    }

    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = schema;
        self
    }
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Shared per-provider throttling state.
#[derive(Debug)]
pub struct ProviderThrottle {
    pub limiter: Option<RateLimiter>,
    pub backoff: FailureBackoff,
}

impl ProviderThrottle {
    fn new(limit: Option<RateLimit>) -> Self {
        Self {
            limiter: limit.map(RateLimiter::new),
            backoff: FailureBackoff::default_provider(),
        }
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.limiter.as_ref().map(RateLimiter::limit)
    }
}

type SpecKey = (String, String);

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    specs: RwLock<HashMap<SpecKey, Arc<ProviderSpec>>>,
    throttles: RwLock<HashMap<String, Arc<ProviderThrottle>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API.
    ///
    /// Registering the same `(provider, name)` again with an identical policy
    /// and schema is a no-op. A different policy or schema, or a rate limit
    /// that conflicts with the provider's existing one, is a configuration
    /// error.
    pub fn register(&self, spec: ProviderSpec) -> Result<(), ApiError> {
        let mut specs = write(&self.specs);
        let mut throttles = write(&self.throttles);
        let key = (spec.provider.clone(), spec.name.clone());

        if let Some(existing) = specs.get(&key) {
            if existing.policy == spec.policy && existing.schema == spec.schema {
                debug!("{}/{} already registered", spec.provider, spec.name);
                return Ok(());
            }
            return Err(ApiError::Configuration(format!(
                "{}/{} is already registered with a different policy or schema",
                spec.provider, spec.name
            )));
        }

        let current = throttles.get(&spec.provider).and_then(|t| t.rate_limit());
        match (current, spec.policy.rate_limit) {
            (Some(have), Some(want)) if have != want => {
                return Err(ApiError::Configuration(format!(
                    "provider {} already limited to {} per {:?}, cannot register {} per {:?}",
                    spec.provider,
                    have.max_requests,
                    have.interval,
                    want.max_requests,
                    want.interval
                )));
            }
            (None, Some(want)) => {
                throttles.insert(
                    spec.provider.clone(),
                    Arc::new(ProviderThrottle::new(Some(want))),
                );
            }
            _ => {
                throttles
                    .entry(spec.provider.clone())
                    .or_insert_with(|| Arc::new(ProviderThrottle::new(None)));
            }
        }

        debug!(
            "registered {}/{} (ttl {:?}, credential: {})",
            spec.provider, spec.name, spec.policy.ttl, spec.policy.requires_credential
        );
        specs.insert(key, Arc::new(spec));
        Ok(())
    }

    /// Look up a registered API.
    pub fn lookup(&self, provider: &str, name: &str) -> Result<Arc<ProviderSpec>, ApiError> {
        read(&self.specs)
            .get(&(provider.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                ApiError::Configuration(format!("no API registered for {provider}/{name}"))
            })
    }

    pub fn throttle(&self, provider: &str) -> Option<Arc<ProviderThrottle>> {
        read(&self.throttles).get(provider).cloned()
    }

    pub fn contains(&self, provider: &str, name: &str) -> bool {
        read(&self.specs).contains_key(&(provider.to_string(), name.to_string()))
    }

    /// All registered `(provider, name)` pairs, sorted.
    pub fn names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = read(&self.specs).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_fetcher(_: &Params, _: Option<&str>) -> Result<DataFrame, ApiError> {
        Ok(DataFrame::empty())
    }

    fn spec(name: &str, policy: CachePolicy) -> ProviderSpec {
        ProviderSpec::new("TDA", name, empty_fetcher, policy)
    }

    #[test]
    fn unknown_api_is_configuration_error() {
        let registry = ProviderRegistry::new();
        let err = registry.lookup("TDA", "history").unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[test]
    fn identical_reregistration_is_a_noop() {
        let registry = ProviderRegistry::new();
        let policy = CachePolicy::new(Duration::from_secs(60));
        registry.register(spec("quote", policy)).unwrap();
        registry.register(spec("quote", policy)).unwrap();
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn conflicting_policy_is_rejected() {
        let registry = ProviderRegistry::new();
        registry
            .register(spec("quote", CachePolicy::new(Duration::from_secs(60))))
            .unwrap();
        let err = registry
            .register(spec("quote", CachePolicy::new(Duration::from_secs(30))))
            .unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[test]
    fn conflicting_provider_rate_limit_is_rejected() {
        let registry = ProviderRegistry::new();
        let ttl = Duration::from_secs(60);
        registry
            .register(spec(
                "quote",
                CachePolicy::new(ttl).with_rate_limit(RateLimit::per_minute(120)),
            ))
            .unwrap();
        let err = registry
            .register(spec(
                "history",
                CachePolicy::new(ttl).with_rate_limit(RateLimit::per_minute(60)),
            ))
            .unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[test]
    fn apis_of_one_provider_share_a_limiter() {
        let registry = ProviderRegistry::new();
        let ttl = Duration::from_secs(60);
        let limit = RateLimit::per_minute(120);
        registry
            .register(spec("quote", CachePolicy::new(ttl).with_rate_limit(limit)))
            .unwrap();
        registry
            .register(spec("history", CachePolicy::new(ttl)))
            .unwrap();

        let throttle = registry.throttle("TDA").unwrap();
        assert_eq!(throttle.limiter.as_ref().map(|l| l.limit()), Some(limit));
        assert!(registry.contains("TDA", "history"));
    }
}
