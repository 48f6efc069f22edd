//! stockaid dataset: windowed, normalized training data for sequence models.
//!
//! This crate builds on `stockaid-core` to provide:
//! - Index-wide ingest of cached price history, fetched in parallel
//! - Per-ticker scaling fitted on the training region only
//! - (look-back, look-ahead) windows split into fit and test sets
//! - Inference windows and inverse scaling of model output
//! - Test scoring (MSE, MAPE, MPE)

pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod scaler;
pub mod series;
pub mod target;
pub mod window;

pub use config::DatasetConfig;
pub use dataset::{DatasetCounts, IngestReport, WindowedDataset};
pub use error::DatasetError;
pub use metrics::TestScore;
pub use scaler::{Scaler, ScalerKind};
pub use series::TimeSeries;
pub use target::Target;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn dataset_is_send_sync() {
        assert_send::<WindowedDataset>();
        assert_sync::<WindowedDataset>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<DatasetConfig>();
        assert_sync::<DatasetConfig>();
        assert_send::<Scaler>();
        assert_sync::<Scaler>();
    }

    #[test]
    fn error_is_send_sync() {
        assert_send::<DatasetError>();
        assert_sync::<DatasetError>();
    }
}
