//! Windowing configuration.

use serde::{Deserialize, Serialize};
use stockaid_core::config::DatasetSettings;

use crate::error::DatasetError;
use crate::scaler::ScalerKind;
use crate::target::Target;

/// Parameters of a [`WindowedDataset`](crate::WindowedDataset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Observations per X window.
    pub look_back: usize,
    /// Observations after X that form y.
    pub look_ahead: usize,
    /// Trailing fraction of each series held out for testing, in `[0, 1)`.
    pub test_ratio: f64,
    /// Column of the history frame to window.
    pub value_column: String,
    pub target: Target,
    pub scaler: ScalerKind,
    /// Windows with any scaled value beyond `±clip` are left out of fit/test.
    pub clip: f64,
    /// API supplying price history.
    pub history_provider: String,
    pub history_name: String,
}

impl DatasetConfig {
    pub fn new(look_back: usize, look_ahead: usize) -> Self {
        Self {
            look_back,
            look_ahead,
            test_ratio: 0.2,
            value_column: "close".into(),
            target: Target::Sequence,
            scaler: ScalerKind::MinMax,
            clip: 5.0,
            history_provider: "TDA".into(),
            history_name: "history".into(),
        }
    }

    pub fn with_test_ratio(mut self, test_ratio: f64) -> Self {
        self.test_ratio = test_ratio;
        self
    }

    pub fn with_value_column(mut self, column: impl Into<String>) -> Self {
        self.value_column = column.into();
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_scaler(mut self, scaler: ScalerKind) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_clip(mut self, clip: f64) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_history_api(mut self, provider: impl Into<String>, name: impl Into<String>) -> Self {
        self.history_provider = provider.into();
        self.history_name = name.into();
        self
    }

    /// Build from the `[dataset]` config section. A target of `auto` picks
    /// [`Target::for_column`] of the value column.
    pub fn from_settings(settings: &DatasetSettings) -> Result<Self, DatasetError> {
        let target = match settings.target.as_str() {
            "auto" => Target::for_column(&settings.value_column),
            other => other.parse()?,
        };
        let config = Self::new(settings.look_back, settings.look_ahead)
            .with_test_ratio(settings.test_ratio)
            .with_value_column(settings.value_column.clone())
            .with_target(target)
            .with_scaler(settings.scaler.parse()?)
            .with_clip(settings.clip);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.look_back == 0 {
            return Err(DatasetError::InvalidParameter("look_back must be > 0".into()));
        }
        if self.look_ahead == 0 {
            return Err(DatasetError::InvalidParameter("look_ahead must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.test_ratio) {
            return Err(DatasetError::InvalidParameter(format!(
                "test_ratio must be in [0, 1), got {}",
                self.test_ratio
            )));
        }
        if self.clip.is_nan() || self.clip <= 0.0 {
            return Err(DatasetError::InvalidParameter(format!(
                "clip must be > 0, got {}",
                self.clip
            )));
        }
        if self.value_column.is_empty() {
            return Err(DatasetError::InvalidParameter("value_column is empty".into()));
        }
        Ok(())
    }

    /// Width of each y row.
    pub fn target_width(&self) -> usize {
        self.target.width(self.look_ahead)
    }
}
