//! Built-in providers.
//!
//! - `index`: index membership tables (no credential, one week TTL, 10 req/min)
//! - `TDA`: price history, quotes and option chains (credential `TDA`, 120 req/60 s)

pub mod index;
pub mod tda;
pub mod transport;
pub mod wiki;

pub use transport::{HttpTransport, ReqwestTransport};

use std::sync::Arc;

use crate::api::ApiCache;
use crate::config::StockaidConfig;
use crate::error::ApiError;

/// Register every built-in API with default policies.
pub fn register_builtin(cache: &ApiCache, transport: Arc<dyn HttpTransport>) -> Result<(), ApiError> {
    register_builtin_with(cache, transport, &StockaidConfig::default())
}

/// Register every built-in API, applying the rate-limit and TTL overrides
/// from `config`.
pub fn register_builtin_with(
    cache: &ApiCache,
    transport: Arc<dyn HttpTransport>,
    config: &StockaidConfig,
) -> Result<(), ApiError> {
    let index_override = config.provider(index::PROVIDER);
    let index_specs = index::specs(Arc::clone(&transport), |name| {
        index_override.policy(name, index::DEFAULT_TTL, index::default_rate_limit())
    });

    let tda_override = config.provider(tda::PROVIDER);
    let tda_specs = tda::specs(transport, |name| {
        let ttl = tda::APIS
            .iter()
            .find(|(api, _)| *api == name)
            .map(|(_, ttl)| *ttl)
            .unwrap_or(std::time::Duration::from_secs(60));
        tda_override
            .policy(name, ttl, tda::default_rate_limit())
            .with_credential()
    });

    for spec in index_specs.into_iter().chain(tda_specs) {
        cache.register(spec)?;
    }
    Ok(())
}
