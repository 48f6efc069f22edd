//! stockaid core: rate-limited, cached access to financial-data APIs.
//!
//! - `api`: the cache, its persistent store, rate limiter, failure backoff
//!   and provider registry
//! - `providers`: built-in `index` and `TDA` providers over an HTTP transport
//! - `table`: payload schemas and column helpers
//! - `greeks`: option price projections from quoted Greeks
//! - `config`: TOML configuration

pub mod api;
pub mod config;
pub mod error;
pub mod greeks;
pub mod providers;
pub mod table;

pub use api::{get_cache, ApiCache, CacheEntry, CachePolicy, Fetcher, KeyChain, Params, ProviderSpec};
pub use config::{ConfigError, StockaidConfig};
pub use error::ApiError;
pub use greeks::GreeksError;
pub use table::{ColumnType, TableSchema};

#[cfg(test)]
mod tests {
    use super::*;

    /// The cache is shared across ingest threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ApiCache>();
        require_sync::<ApiCache>();
        require_send::<api::RateLimiter>();
        require_sync::<api::RateLimiter>();
        require_send::<api::PersistentCache>();
        require_sync::<api::PersistentCache>();
        require_send::<ProviderSpec>();
        require_sync::<ProviderSpec>();
        require_send::<ApiError>();
        require_sync::<ApiError>();
        require_send::<GreeksError>();
        require_sync::<GreeksError>();
    }

    #[test]
    fn get_cache_returns_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let first = get_cache(dir.path(), KeyChain::new());
        let second = get_cache("/ignored/on/later/calls", KeyChain::new());
        assert!(std::ptr::eq(first, second));
        assert!(first.registry().contains("TDA", "history"));
        assert!(first.registry().contains("index", "sp500"));
    }
}
