//! TOML configuration.
//!
//! Every section is optional; an empty file yields the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::api::{CachePolicy, RateLimit};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockaidConfig {
    pub cache: CacheSection,
    /// Provider name -> environment variable holding its credential.
    pub credentials: BTreeMap<String, String>,
    pub providers: BTreeMap<String, ProviderOverride>,
    pub dataset: DatasetSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub path: Option<PathBuf>,
}

/// Rate limit and TTL overrides for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub max_requests: Option<u32>,
    pub interval_secs: Option<u64>,
    /// API name -> TTL in seconds.
    pub ttl_secs: BTreeMap<String, u64>,
}

impl ProviderOverride {
    /// Apply this override to a provider's default rate limit.
    pub fn rate_limit(&self, default: RateLimit) -> RateLimit {
        RateLimit::new(
            self.max_requests.unwrap_or(default.max_requests),
            self.interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default.interval),
        )
    }

    pub fn ttl(&self, api: &str, default: Duration) -> Duration {
        self.ttl_secs
            .get(api)
            .map(|s| Duration::from_secs(*s))
            .unwrap_or(default)
    }

    /// Default policy for `api` with this override applied.
    pub fn policy(&self, api: &str, ttl: Duration, limit: RateLimit) -> CachePolicy {
        CachePolicy::new(self.ttl(api, ttl)).with_rate_limit(self.rate_limit(limit))
    }
}

/// Windowing defaults. The dataset crate validates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub look_back: usize,
    pub look_ahead: usize,
    pub test_ratio: f64,
    pub value_column: String,
    /// `min_max` or `mean`.
    pub scaler: String,
    pub clip: f64,
    /// `sequence`, `first`, `last`, `max`, `min`, or `auto` (pick by value column).
    pub target: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            look_back: 65,
            look_ahead: 1,
            test_ratio: 0.2,
            value_column: "close".into(),
            scaler: "min_max".into(),
            clip: 5.0,
            target: "sequence".into(),
        }
    }
}

impl StockaidConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override for `provider`, or the empty override.
    pub fn provider(&self, provider: &str) -> ProviderOverride {
        self.providers.get(provider).cloned().unwrap_or_default()
    }

    /// Environment variable naming the credential for `provider`.
    pub fn credential_var(&self, provider: &str) -> String {
        self.credentials
            .get(provider)
            .cloned()
            .unwrap_or_else(|| format!("STOCKAID_{}_KEY", provider.to_ascii_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = StockaidConfig::from_toml("").unwrap();
        assert_eq!(cfg, StockaidConfig::default());
        assert_eq!(cfg.dataset.look_back, 65);
        assert_eq!(cfg.credential_var("TDA"), "STOCKAID_TDA_KEY");
    }

    #[test]
    fn parses_all_sections() {
        let cfg = StockaidConfig::from_toml(
            r#"
            [cache]
            path = "/tmp/stockaid"

            [credentials]
            TDA = "MY_TDA_KEY"

            [providers.TDA]
            max_requests = 60

            [providers.TDA.ttl_secs]
            history = 3600

            [dataset]
            look_back = 20
            scaler = "mean"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.cache.path, Some(PathBuf::from("/tmp/stockaid")));
        assert_eq!(cfg.credential_var("TDA"), "MY_TDA_KEY");
        let tda = cfg.provider("TDA");
        let limit = tda.rate_limit(RateLimit::new(120, Duration::from_secs(60)));
        assert_eq!(limit.max_requests, 60);
        assert_eq!(limit.interval, Duration::from_secs(60));
        assert_eq!(
            tda.ttl("history", Duration::from_secs(86_400)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            tda.ttl("quote", Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        assert_eq!(cfg.dataset.look_back, 20);
        assert_eq!(cfg.dataset.look_ahead, 1);
        assert_eq!(cfg.dataset.scaler, "mean");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(
            StockaidConfig::from_toml("[dataset\nlook_back = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = StockaidConfig::default();
        cfg.credentials.insert("TDA".into(), "X".into());
        let parsed = StockaidConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = StockaidConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
