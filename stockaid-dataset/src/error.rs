//! Dataset errors.

use stockaid_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("no data has been ingested yet")]
    NotFitted,

    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Api(#[from] ApiError),
}
