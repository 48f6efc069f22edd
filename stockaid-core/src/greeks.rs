//! Option price projections from the Greeks.
//!
//! Given a predicted move in the underlying (for example from a windowed
//! model's forecast), estimate how an option quote will move. Delta is
//! stepped one whole dollar at a time with gamma and clamped to `[-1, 1]`;
//! theta is applied per day. Vega and rho adjustments take a predicted change
//! in volatility or rates expressed as a decimal.

use polars::prelude::*;
use thiserror::Error;

use crate::error::ApiError;
use crate::table::read_floats;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GreeksError {
    #[error("Greeks out of bounds: delta {delta} must lie in [-1, 1], gamma {gamma} in [0, 1]")]
    OutOfBounds { delta: f64, gamma: f64 },

    #[error("option price must be non-zero")]
    ZeroOptionPrice,
}

/// Projected change in option price after the underlying moves by
/// `underlying_change` over `days_in_future` days.
pub fn option_change(
    underlying_change: f64,
    days_in_future: u32,
    delta: f64,
    gamma: f64,
    theta: f64,
) -> Result<f64, GreeksError> {
    let in_bounds = (-1.0..=1.0).contains(&delta) && (0.0..=1.0).contains(&gamma);
    if !in_bounds {
        return Err(GreeksError::OutOfBounds { delta, gamma });
    }

    let sign = if underlying_change < 0.0 { -1.0 } else { 1.0 };
    let mut remaining = underlying_change;
    let mut delta = delta;
    let mut change = 0.0;

    // Whole dollars first, re-deriving delta after each step.
    while remaining.abs() > 1.0 {
        change += sign * delta;
        remaining -= sign;
        delta = (delta + sign * gamma).clamp(-1.0, 1.0);
    }
    change += delta * remaining;

    Ok(change + f64::from(days_in_future) * theta)
}

/// Price change from a predicted change in implied volatility.
pub fn adjust_for_vega(predicted_volatility_change: f64, vega: f64) -> f64 {
    predicted_volatility_change * 100.0 * vega
}

/// Price change from a predicted change in interest rates.
pub fn adjust_for_rho(predicted_interest_rate_change: f64, rho: f64) -> f64 {
    predicted_interest_rate_change * 100.0 * rho
}

/// Leverage: percent change in option price per 1% move in the underlying.
pub fn option_lambda(underlying_price: f64, option_price: f64, delta: f64) -> Result<f64, GreeksError> {
    if option_price == 0.0 {
        return Err(GreeksError::ZeroOptionPrice);
    }
    Ok(delta * underlying_price / option_price)
}

/// Add a `projectedChange` column to a `TDA/chains` frame for a move of
/// `underlying_change` over `days_in_future` days. Contracts whose quoted
/// Greeks are out of bounds (the API reports missing values as -999) get NaN.
pub fn project_chain(
    chains: &DataFrame,
    underlying_change: f64,
    days_in_future: u32,
) -> Result<DataFrame, ApiError> {
    let delta = read_floats(chains, "delta")?;
    let gamma = read_floats(chains, "gamma")?;
    let theta = read_floats(chains, "theta")?;

    let projected: Vec<f64> = delta
        .iter()
        .zip(&gamma)
        .zip(&theta)
        .map(|((d, g), t)| {
            option_change(underlying_change, days_in_future, *d, *g, *t).unwrap_or(f64::NAN)
        })
        .collect();

    let mut out = chains.clone();
    out.with_column(Column::new("projectedChange".into(), projected))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn steps_delta_by_gamma_per_dollar() {
        // 0.5 + 0.6 for two whole dollars, 0.7 * 0.5 for the rest, minus 3 days of theta.
        let change = option_change(2.5, 3, 0.5, 0.1, -0.05).unwrap();
        assert!(close(change, 1.3));
    }

    #[test]
    fn downward_move_reduces_delta() {
        let change = option_change(-1.5, 0, 0.5, 0.1, 0.0).unwrap();
        assert!(close(change, -0.7));
    }

    #[test]
    fn delta_is_clamped_to_one() {
        let change = option_change(3.0, 0, 0.95, 0.1, 0.0).unwrap();
        assert!(close(change, 2.95));
    }

    #[test]
    fn small_move_uses_delta_only() {
        assert!(close(option_change(0.4, 0, 0.5, 0.2, 0.0).unwrap(), 0.2));
        assert!(close(option_change(0.0, 2, 0.5, 0.2, -0.1).unwrap(), -0.2));
    }

    #[test]
    fn out_of_bounds_greeks_are_rejected() {
        for (delta, gamma) in [(1.2, 0.1), (-1.5, 0.1), (0.5, -0.1), (0.5, 1.5), (f64::NAN, 0.1)] {
            let err = option_change(1.0, 1, delta, gamma, 0.0).unwrap_err();
            assert!(matches!(err, GreeksError::OutOfBounds { .. }));
            assert!(err.to_string().starts_with("Greeks out of bounds"));
        }
    }

    #[test]
    fn vega_rho_and_lambda() {
        assert!(close(adjust_for_vega(0.1, 0.2), 2.0));
        assert!(close(adjust_for_rho(-0.0025, 0.4), -0.1));
        assert!(close(option_lambda(100.0, 5.0, 0.5).unwrap(), 10.0));
        assert_eq!(option_lambda(100.0, 0.0, 0.5), Err(GreeksError::ZeroOptionPrice));
    }

    #[test]
    fn projects_every_contract_in_a_chain() {
        let chains = DataFrame::new(vec![
            Column::new("symbol".into(), &["A_C1", "A_C2"]),
            Column::new("delta".into(), &[0.5, -999.0]),
            Column::new("gamma".into(), &[0.1, -999.0]),
            Column::new("theta".into(), &[-0.05, -999.0]),
        ])
        .unwrap();

        let projected = project_chain(&chains, 2.5, 3).unwrap();
        let values = read_floats(&projected, "projectedChange").unwrap();
        assert!(close(values[0], 1.3));
        assert!(values[1].is_nan());
        assert_eq!(projected.width(), 5);
    }

    #[test]
    fn chain_without_greeks_is_a_format_error() {
        let chains = DataFrame::new(vec![Column::new("symbol".into(), &["A_C1"])]).unwrap();
        let err = project_chain(&chains, 1.0, 1).unwrap_err();
        assert!(matches!(err, ApiError::DataFormat(_)));
    }
}
