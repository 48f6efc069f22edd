//! Provider credentials.

use std::collections::HashMap;
use std::fmt;

/// Secrets keyed by provider name. `Debug` prints provider names only.
#[derive(Clone, Default)]
pub struct KeyChain {
    secrets: HashMap<String, String>,
}

impl KeyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(provider, secret);
        self
    }

    pub fn insert(&mut self, provider: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(provider.into(), secret.into());
    }

    pub fn get(&self, provider: &str) -> Option<&str> {
        self.secrets
            .get(provider)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.get(provider).is_some()
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&str> = self.secrets.keys().map(String::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("KeyChain")
            .field("providers", &providers)
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyChain {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut chain = KeyChain::new();
        for (k, v) in iter {
            chain.insert(k, v);
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_secrets() {
        let chain = KeyChain::new().with("TDA", "super-secret-key");
        let printed = format!("{chain:?}");
        assert!(printed.contains("TDA"));
        assert!(!printed.contains("super-secret-key"));
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let chain = KeyChain::new().with("TDA", "");
        assert!(!chain.contains("TDA"));
        assert_eq!(chain.get("TDA"), None);
    }

    #[test]
    fn collects_from_pairs() {
        let chain: KeyChain = [("TDA", "k1")].into_iter().collect();
        assert_eq!(chain.get("TDA"), Some("k1"));
    }
}
