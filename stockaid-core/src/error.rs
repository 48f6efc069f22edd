//! Structured error types for API access.
//!
//! Every failure that can reach a caller of [`ApiCache::api`](crate::api::ApiCache::api)
//! is one of these variants. Storage failures never appear here: the cache
//! degrades to memory instead of failing the request.

use thiserror::Error;

/// Errors surfaced by the cache, the registry and the built-in providers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad registration, unknown provider/name, or invalid configuration.
    /// Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required credential is missing or was rejected by the provider.
    #[error("credential error for provider '{provider}': {reason}")]
    Credential { provider: String, reason: String },

    /// Transport-level failure. Not cached; the next call retries.
    #[error("fetch failed for {provider}/{name}: {reason}")]
    Fetch {
        provider: String,
        name: String,
        reason: String,
        /// Provider-suggested delay before the next attempt, if any.
        retry_after_secs: Option<u64>,
    },

    /// The remote payload could not be turned into the expected table.
    #[error("data format error: {0}")]
    DataFormat(String),
}

impl ApiError {
    pub fn fetch(provider: &str, name: &str, reason: impl Into<String>) -> Self {
        ApiError::Fetch {
            provider: provider.to_string(),
            name: name.to_string(),
            reason: reason.into(),
            retry_after_secs: None,
        }
    }

    pub fn credential(provider: &str, reason: impl Into<String>) -> Self {
        ApiError::Credential {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Attribute a transport error to the API call that issued it.
    pub fn for_call(self, provider: &str, name: &str) -> Self {
        match self {
            ApiError::Fetch {
                reason,
                retry_after_secs,
                ..
            } => ApiError::Fetch {
                provider: provider.to_string(),
                name: name.to_string(),
                reason,
                retry_after_secs,
            },
            ApiError::Credential { reason, .. } => ApiError::credential(provider, reason),
            other => other,
        }
    }

    /// True for failures that may succeed if the same call is made again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Fetch { .. })
    }
}

impl From<polars::prelude::PolarsError> for ApiError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        ApiError::DataFormat(e.to_string())
    }
}
