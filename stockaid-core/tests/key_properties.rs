//! Property tests for cache keys and rate limiting.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;
use stockaid_core::api::{CacheKey, Params, RateLimit, RateLimiter};

fn arb_params() -> impl Strategy<Value = Params> {
    prop::collection::btree_map("[a-zA-Z]{1,8}", "[ -~]{0,12}", 0..5)
}

proptest! {
    /// Different parameter maps never share a key or a digest.
    #[test]
    fn distinct_params_give_distinct_digests(a in arb_params(), b in arb_params()) {
        let ka = CacheKey::new("TDA", "history", &a);
        let kb = CacheKey::new("TDA", "history", &b);
        prop_assert_eq!(a == b, ka == kb);
        prop_assert_eq!(a == b, ka.digest() == kb.digest());
    }

    /// Insertion order does not affect the key.
    #[test]
    fn key_ignores_insertion_order(pairs in prop::collection::vec(("[a-z]{1,6}", "[0-9]{1,4}"), 0..6)) {
        let forward: BTreeMap<String, String> = pairs.iter().cloned().collect();
        let reverse: BTreeMap<String, String> = pairs.iter().rev().cloned().collect();
        // Later duplicates win in each map, so compare only when keys are unique.
        prop_assume!(forward.len() == pairs.len());
        prop_assert_eq!(
            CacheKey::new("index", "sp500", &forward).digest(),
            CacheKey::new("index", "sp500", &reverse).digest()
        );
    }

    /// Within one window the limiter admits exactly `max_requests`.
    #[test]
    fn limiter_admits_exactly_max(max in 1u32..20, attempts in 0u32..40) {
        let limiter = RateLimiter::new(RateLimit::new(max, Duration::from_secs(60)));
        let admitted = (0..attempts).filter(|_| limiter.try_acquire()).count() as u32;
        prop_assert_eq!(admitted, attempts.min(max));
        prop_assert_eq!(limiter.available(), max - attempts.min(max));
    }
}
