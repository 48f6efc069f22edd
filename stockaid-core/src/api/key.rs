//! Request parameters and cache keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Request parameters. `BTreeMap` keeps the encoding canonical.
pub type Params = BTreeMap<String, String>;

/// Build `Params` from `(key, value)` pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Identity of one cached request: provider, API name and canonical params.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub provider: String,
    pub name: String,
    /// JSON encoding of the sorted parameter map.
    pub params: String,
}

impl CacheKey {
    pub fn new(provider: &str, name: &str, params: &Params) -> Self {
        // Serializing a BTreeMap<String, String> cannot fail.
        let encoded = serde_json::to_string(params).unwrap_or_default();
        Self {
            provider: provider.to_string(),
            name: name.to_string(),
            params: encoded,
        }
    }

    /// Canonical single-string form. Field boundaries are unambiguous because
    /// each field is JSON-encoded.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&(&self.provider, &self.name, &self.params)).unwrap_or_default()
    }

    /// BLAKE3 digest of the canonical form, used as the on-disk file stem.
    pub fn digest(&self) -> String {
        blake3::hash(self.canonical().as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.provider, self.name, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_across_insertion_order() {
        let a = params([("symbol", "AAPL"), ("period", "20")]);
        let b = params([("period", "20"), ("symbol", "AAPL")]);
        assert_eq!(
            CacheKey::new("TDA", "history", &a).digest(),
            CacheKey::new("TDA", "history", &b).digest()
        );
    }

    #[test]
    fn distinct_params_give_distinct_keys() {
        let a = CacheKey::new("TDA", "history", &params([("symbol", "AAPL")]));
        let b = CacheKey::new("TDA", "history", &params([("symbol", "MSFT")]));
        assert_ne!(a, b);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn separators_inside_values_do_not_collide() {
        let a = CacheKey::new("TDA", "history", &params([("a", "1,b=2")]));
        let b = CacheKey::new("TDA", "history", &params([("a", "1"), ("b", "2")]));
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn provider_and_name_are_part_of_the_key() {
        let p = Params::new();
        let a = CacheKey::new("index", "sp500", &p);
        let b = CacheKey::new("index", "OEX", &p);
        let c = CacheKey::new("other", "sp500", &p);
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }
}
