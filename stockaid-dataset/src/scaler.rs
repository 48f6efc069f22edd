//! Per-ticker normalization fitted on the training region.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DatasetError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// `(v - min) / (max - min)`.
    #[default]
    MinMax,
    /// `v / mean`.
    Mean,
}

impl FromStr for ScalerKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "min_max" | "minmax" => Ok(ScalerKind::MinMax),
            "mean" => Ok(ScalerKind::Mean),
            other => Err(DatasetError::InvalidParameter(format!(
                "unknown scaler '{other}'"
            ))),
        }
    }
}

/// Affine transform `scaled = (v - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub kind: ScalerKind,
    pub offset: f64,
    pub scale: f64,
}

impl Scaler {
    /// Fit on `values`, ignoring non-finite entries. A degenerate range (a
    /// constant series, a zero mean, or no finite values) falls back to a
    /// scale of 1 so the transform stays invertible.
    pub fn fit(kind: ScalerKind, values: &[f64]) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (offset, scale) = match kind {
            ScalerKind::MinMax => {
                let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                if min.is_finite() {
                    (min, max - min)
                } else {
                    (0.0, 1.0)
                }
            }
            ScalerKind::Mean => {
                let (sum, n) = finite.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                let mean = if n > 0 { sum / n as f64 } else { 1.0 };
                (0.0, mean)
            }
        };
        let scale = if scale.is_finite() && scale.abs() > f64::EPSILON {
            scale
        } else {
            1.0
        };
        Self {
            kind,
            offset,
            scale,
        }
    }

    pub fn transform(&self, v: f64) -> f64 {
        (v - self.offset) / self.scale
    }

    pub fn inverse(&self, v: f64) -> f64 {
        v * self.scale + self.offset
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.transform(*v)).collect()
    }

    pub fn inverse_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.inverse(*v)).collect()
    }
}
