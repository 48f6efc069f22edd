//! Prediction error metrics. Pure functions over paired slices.

use serde::{Deserialize, Serialize};

/// Score of model predictions against the held-out targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestScore {
    /// Mean squared error in scaled units.
    pub mse: f64,
    /// Mean absolute percentage error in original units (fraction, not %).
    pub mape: f64,
    /// Mean percentage error in original units; the sign shows bias.
    pub mpe: f64,
    /// Number of scored values.
    pub count: usize,
}

/// Mean squared error. NaN for empty input.
pub fn mse(predicted: &[f64], actual: &[f64]) -> f64 {
    mean(predicted.iter().zip(actual).map(|(p, a)| (p - a).powi(2)))
}

/// Mean absolute percentage error, skipping zero or non-finite targets.
pub fn mape(predicted: &[f64], actual: &[f64]) -> f64 {
    mean(relative_errors(predicted, actual).map(f64::abs))
}

/// Mean percentage error, skipping zero or non-finite targets.
pub fn mpe(predicted: &[f64], actual: &[f64]) -> f64 {
    mean(relative_errors(predicted, actual))
}

fn relative_errors<'a>(predicted: &'a [f64], actual: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    predicted
        .iter()
        .zip(actual)
        .filter(|(_, a)| a.is_finite() && **a != 0.0)
        .map(|(p, a)| (p - a) / a)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}
