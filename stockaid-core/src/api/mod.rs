//! Rate-limited, cached access to registered data APIs.

pub mod backoff;
pub mod cache;
pub mod credentials;
pub mod key;
pub mod limiter;
pub mod registry;
pub mod store;

pub use backoff::FailureBackoff;
pub use cache::{get_cache, ApiCache};
pub use credentials::KeyChain;
pub use key::{params, CacheKey, Params};
pub use limiter::{RateLimit, RateLimiter};
pub use registry::{CachePolicy, Fetcher, ProviderRegistry, ProviderSpec, ProviderThrottle};
pub use store::{CacheEntry, EntryStatus, PersistentCache, StoreError};
