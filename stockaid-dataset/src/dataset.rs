//! Windowed training, test and inference data built from cached price history.
//!
//! Each ticker's series is split in time: the trailing `round(L * test_ratio)`
//! observations are the test region, the rest the training region. A scaler
//! is fitted on the training region only and applied to every window of that
//! ticker. Training windows lie entirely in the training region; test windows
//! have their targets entirely in the test region.

use log::{debug, info, warn};
use ndarray::Array2;
use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use stockaid_core::api::{params, ApiCache, Params};
use stockaid_core::table::read_strings;
use stockaid_core::ApiError;

use crate::config::DatasetConfig;
use crate::error::DatasetError;
use crate::metrics::{self, TestScore};
use crate::scaler::Scaler;
use crate::series::TimeSeries;
use crate::window;

/// Windows derived from one ticker. `*_x` and `*_y` are row-major.
#[derive(Debug, Clone)]
struct TickerWindows {
    series: TimeSeries,
    scaler: Scaler,
    fit_x: Vec<f64>,
    fit_y: Vec<f64>,
    n_fit: usize,
    test_x: Vec<f64>,
    test_y: Vec<f64>,
    n_test: usize,
    clipped: usize,
    /// Most recent `look_back` scaled values.
    future_x: Vec<f64>,
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub ingested: Vec<String>,
    /// `(ticker, reason)`.
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatasetCounts {
    pub tickers: usize,
    pub skipped: usize,
    pub fit: usize,
    pub test: usize,
}

pub struct WindowedDataset {
    config: DatasetConfig,
    cache: Arc<ApiCache>,
    tickers: BTreeMap<String, TickerWindows>,
    skipped: BTreeMap<String, String>,
    /// Set by the first ingest call, whatever its outcome.
    ingested: bool,
}

impl WindowedDataset {
    pub fn new(cache: Arc<ApiCache>, config: DatasetConfig) -> Result<Self, DatasetError> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            tickers: BTreeMap::new(),
            skipped: BTreeMap::new(),
            ingested: false,
        })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    // ── Ingest ──────────────────────────────────────────────────────

    /// Ingest every constituent of `index`. Price history is requested with
    /// `period = amount`, `periodType = unit`, `frequencyType = granularity`.
    /// Tickers whose fetch fails or whose history is too short are skipped.
    pub fn ingest_index(
        &mut self,
        index: &str,
        amount: u32,
        unit: &str,
        granularity: &str,
    ) -> Result<IngestReport, DatasetError> {
        self.ingest_index_except(index, amount, unit, granularity, &[])
    }

    /// Like [`ingest_index`](Self::ingest_index), leaving out `omit`.
    pub fn ingest_index_except(
        &mut self,
        index: &str,
        amount: u32,
        unit: &str,
        granularity: &str,
        omit: &[&str],
    ) -> Result<IngestReport, DatasetError> {
        let members = self.cache.api("index", index, &Params::new())?;
        let omit: HashSet<&str> = omit.iter().copied().collect();
        let mut seen = HashSet::new();
        let symbols: Vec<String> = read_strings(&members, "symbol")?
            .into_iter()
            .filter(|s| !s.is_empty() && !omit.contains(s.as_str()) && seen.insert(s.clone()))
            .collect();

        info!("ingesting {} constituents of {index}", symbols.len());
        let started = Instant::now();

        let cache = &self.cache;
        let config = &self.config;
        let outcomes: Vec<(String, Result<TickerWindows, String>)> = symbols
            .par_iter()
            .map(|symbol| {
                let outcome = fetch_history(cache, config, symbol, amount, unit, granularity)
                    .map_err(|e| e.to_string())
                    .and_then(|series| build_windows(series, config));
                (symbol.clone(), outcome)
            })
            .collect();

        let report = self.absorb(outcomes);
        info!(
            "ingested {} of {} tickers from {index} in {:.3}s",
            report.ingested.len(),
            symbols.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Ingest one symbol's history. Fetch errors are returned; a history
    /// that is too short is reported as skipped.
    pub fn ingest_symbol(
        &mut self,
        symbol: &str,
        amount: u32,
        unit: &str,
        granularity: &str,
    ) -> Result<IngestReport, DatasetError> {
        let series = fetch_history(&self.cache, &self.config, symbol, amount, unit, granularity)?;
        Ok(self.ingest_series(symbol, series))
    }

    /// Ingest a history frame sourced elsewhere. It needs a `date` column
    /// and the configured value column.
    pub fn ingest_frame(&mut self, ticker: &str, df: &DataFrame) -> Result<IngestReport, DatasetError> {
        let series = TimeSeries::from_frame(df, &self.config.value_column)?;
        Ok(self.ingest_series(ticker, series))
    }

    pub fn ingest_series(&mut self, ticker: &str, series: TimeSeries) -> IngestReport {
        let outcome = build_windows(series, &self.config);
        self.absorb(vec![(ticker.to_string(), outcome)])
    }

    fn absorb(&mut self, outcomes: Vec<(String, Result<TickerWindows, String>)>) -> IngestReport {
        self.ingested = true;
        let mut report = IngestReport::default();
        for (ticker, outcome) in outcomes {
            match outcome {
                Ok(windows) => {
                    debug!(
                        "{ticker}: {} observations, {} fit / {} test windows, {} clipped",
                        windows.series.len(),
                        windows.n_fit,
                        windows.n_test,
                        windows.clipped
                    );
                    self.skipped.remove(&ticker);
                    self.tickers.insert(ticker.clone(), windows);
                    report.ingested.push(ticker);
                }
                Err(reason) => {
                    warn!("skipping {ticker}: {reason}");
                    self.tickers.remove(&ticker);
                    self.skipped.insert(ticker.clone(), reason.clone());
                    report.skipped.push((ticker, reason));
                }
            }
        }
        report
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Training windows across all tickers in ticker order:
    /// X `[n, look_back]`, y `[n, target width]`.
    pub fn fit_data(&self) -> (Array2<f64>, Array2<f64>) {
        let n = self.tickers.values().map(|t| t.n_fit).sum();
        (
            stack(self.tickers.values().map(|t| &t.fit_x[..]), n, self.config.look_back),
            stack(self.tickers.values().map(|t| &t.fit_y[..]), n, self.config.target_width()),
        )
    }

    /// Held-out X windows `[n, look_back]`.
    pub fn test_data(&self) -> Array2<f64> {
        let n = self.test_rows();
        stack(self.tickers.values().map(|t| &t.test_x[..]), n, self.config.look_back)
    }

    /// Held-out y rows `[n, target width]`, aligned with [`test_data`](Self::test_data).
    pub fn test_targets(&self) -> Array2<f64> {
        let n = self.test_rows();
        stack(self.tickers.values().map(|t| &t.test_y[..]), n, self.config.target_width())
    }

    fn test_rows(&self) -> usize {
        self.tickers.values().map(|t| t.n_test).sum()
    }

    /// Compare model output on [`test_data`](Self::test_data) with the true
    /// targets. `predictions` are in scaled units, in row-major order.
    ///
    /// MSE is computed in scaled units; MAPE and MPE after inverting each
    /// ticker's scaler.
    pub fn score_test<'a>(
        &self,
        predictions: impl IntoIterator<Item = &'a f64>,
    ) -> Result<TestScore, DatasetError> {
        if !self.ingested {
            return Err(DatasetError::NotFitted);
        }
        let predictions: Vec<f64> = predictions.into_iter().copied().collect();
        let expected = self.test_rows() * self.config.target_width();
        if predictions.len() != expected {
            return Err(DatasetError::ShapeMismatch {
                expected,
                actual: predictions.len(),
            });
        }

        let mut targets = Vec::with_capacity(expected);
        let mut raw_predictions = Vec::with_capacity(expected);
        let mut raw_targets = Vec::with_capacity(expected);
        let mut offset = 0;
        for t in self.tickers.values() {
            let rows = &predictions[offset..offset + t.test_y.len()];
            offset += t.test_y.len();
            targets.extend_from_slice(&t.test_y);
            raw_predictions.extend(t.scaler.inverse_all(rows));
            raw_targets.extend(t.scaler.inverse_all(&t.test_y));
        }

        let score = TestScore {
            mse: metrics::mse(&predictions, &targets),
            mape: metrics::mape(&raw_predictions, &raw_targets),
            mpe: metrics::mpe(&raw_predictions, &raw_targets),
            count: expected,
        };
        info!(
            "test score: MSE={:.6}, MAPE={:.4}, MPE={:.4} over {} values",
            score.mse, score.mape, score.mpe, score.count
        );
        Ok(score)
    }

    fn ticker(&self, ticker: &str) -> Result<&TickerWindows, DatasetError> {
        match self.tickers.get(ticker) {
            Some(t) => Ok(t),
            None if !self.ingested => Err(DatasetError::NotFitted),
            None => Err(DatasetError::UnknownTicker(ticker.to_string())),
        }
    }

    /// The most recent scaled window for `ticker`, shape `[1, look_back]`.
    pub fn future_data(&self, ticker: &str) -> Result<Array2<f64>, DatasetError> {
        let t = self.ticker(ticker)?;
        Ok(Array2::from_shape_fn((1, self.config.look_back), |(_, j)| {
            t.future_x[j]
        }))
    }

    /// Map model output for `ticker` back to original units.
    pub fn unscale_future<'a>(
        &self,
        ticker: &str,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> Result<Vec<f64>, DatasetError> {
        let t = self.ticker(ticker)?;
        Ok(values.into_iter().map(|v| t.scaler.inverse(*v)).collect())
    }

    /// Last observed (unscaled) value for `ticker`.
    pub fn last_value(&self, ticker: &str) -> Result<f64, DatasetError> {
        let t = self.ticker(ticker)?;
        t.series
            .last()
            .map(|(_, v)| v)
            .ok_or_else(|| DatasetError::UnknownTicker(ticker.to_string()))
    }

    pub fn series(&self, ticker: &str) -> Result<&TimeSeries, DatasetError> {
        Ok(&self.ticker(ticker)?.series)
    }

    pub fn scaler(&self, ticker: &str) -> Result<Scaler, DatasetError> {
        Ok(self.ticker(ticker)?.scaler)
    }

    /// Ingested tickers, sorted.
    pub fn tickers(&self) -> Vec<&str> {
        self.tickers.keys().map(String::as_str).collect()
    }

    /// Skipped tickers with the reason.
    pub fn skipped(&self) -> &BTreeMap<String, String> {
        &self.skipped
    }

    pub fn counts(&self) -> DatasetCounts {
        DatasetCounts {
            tickers: self.tickers.len(),
            skipped: self.skipped.len(),
            fit: self.tickers.values().map(|t| t.n_fit).sum(),
            test: self.test_rows(),
        }
    }
}

fn fetch_history(
    cache: &ApiCache,
    config: &DatasetConfig,
    symbol: &str,
    amount: u32,
    unit: &str,
    granularity: &str,
) -> Result<TimeSeries, ApiError> {
    let p = params([
        ("symbol", symbol.to_string()),
        ("period", amount.to_string()),
        ("periodType", unit.to_string()),
        ("frequencyType", granularity.to_string()),
    ]);
    let df = cache.api(&config.history_provider, &config.history_name, &p)?;
    TimeSeries::from_frame(&df, &config.value_column)
}

/// Scale and window one series. `Err` carries the reason it was skipped.
fn build_windows(series: TimeSeries, config: &DatasetConfig) -> Result<TickerWindows, String> {
    let len = series.len();
    let (look_back, look_ahead) = (config.look_back, config.look_ahead);
    if len < look_back + look_ahead {
        return Err(format!(
            "history has {len} observations, need at least {}",
            look_back + look_ahead
        ));
    }

    let train_len = len - window::test_len(len, config.test_ratio);
    let scaler = Scaler::fit(config.scaler, &series.values()[..train_len]);
    let scaled = scaler.transform_all(series.values());
    let within_clip = |values: &[f64]| values.iter().all(|v| v.is_finite() && v.abs() <= config.clip);

    let mut w = TickerWindows {
        future_x: scaled[len - look_back..].to_vec(),
        series,
        scaler,
        fit_x: Vec::new(),
        fit_y: Vec::new(),
        n_fit: 0,
        test_x: Vec::new(),
        test_y: Vec::new(),
        n_test: 0,
        clipped: 0,
    };

    for span in window::spans(len, look_back, look_ahead) {
        let in_train = span.y.end <= train_len;
        let in_test = span.y.start >= train_len;
        if !in_train && !in_test {
            continue;
        }
        let x = &scaled[span.x];
        let ahead = &scaled[span.y];
        if !within_clip(x) || !within_clip(ahead) {
            w.clipped += 1;
            continue;
        }
        if in_train {
            w.fit_x.extend_from_slice(x);
            config.target.reduce_into(ahead, &mut w.fit_y);
            w.n_fit += 1;
        } else {
            w.test_x.extend_from_slice(x);
            config.target.reduce_into(ahead, &mut w.test_y);
            w.n_test += 1;
        }
    }

    Ok(w)
}

/// Concatenate row-major blocks into an `[n, width]` matrix.
fn stack<'a>(blocks: impl Iterator<Item = &'a [f64]>, n: usize, width: usize) -> Array2<f64> {
    let flat: Vec<f64> = blocks.flat_map(|b| b.iter().copied()).collect();
    Array2::from_shape_fn((n, width), |(i, j)| flat[i * width + j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::ScalerKind;
    use crate::target::Target;
    use chrono::NaiveDate;
    use stockaid_core::KeyChain;

    fn series(values: &[f64]) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        TimeSeries::from_pairs(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (start + chrono::Duration::days(i as i64), *v))
                .collect(),
        )
    }

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    fn dataset(config: DatasetConfig) -> WindowedDataset {
        WindowedDataset::new(Arc::new(ApiCache::in_memory(KeyChain::new())), config).unwrap()
    }

    #[test]
    fn window_counts_follow_split() {
        // 25 observations, 20/1: 5 windows total, test region is the last 5
        // observations, so no window has X and y both in the first 20.
        let mut ds = dataset(DatasetConfig::new(20, 1).with_test_ratio(0.2).with_clip(100.0));
        ds.ingest_series("A", series(&ramp(25)));
        let counts = ds.counts();
        assert_eq!(counts.fit, 0);
        assert_eq!(counts.test, 5);

        let mut ds = dataset(DatasetConfig::new(20, 1).with_test_ratio(0.0));
        ds.ingest_series("A", series(&ramp(25)));
        assert_eq!(ds.counts().fit, 5);
        assert_eq!(ds.counts().test, 0);
    }

    #[test]
    fn short_series_is_skipped_not_fatal() {
        let mut ds = dataset(DatasetConfig::new(20, 1));
        let report = ds.ingest_series("SHORT", series(&ramp(19)));
        assert!(report.ingested.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(ds.skipped().contains_key("SHORT"));
        assert!(ds.tickers().is_empty());
    }

    #[test]
    fn scaler_sees_only_training_region() {
        let mut values = ramp(10);
        values.extend([1000.0; 10]);
        let mut ds = dataset(
            DatasetConfig::new(3, 1)
                .with_test_ratio(0.5)
                .with_clip(1e9),
        );
        ds.ingest_series("A", series(&values));
        let scaler = ds.scaler("A").unwrap();
        assert_eq!(scaler.offset, 100.0);
        assert_eq!(scaler.scale, 9.0);
    }

    #[test]
    fn clip_drops_outlier_windows() {
        let mut values = vec![1.0; 30];
        values[10] = 50.0;
        let mut ds = dataset(
            DatasetConfig::new(3, 1)
                .with_test_ratio(0.0)
                .with_scaler(ScalerKind::Mean)
                .with_clip(5.0),
        );
        ds.ingest_series("A", series(&values));
        // Windows touching index 10 (as X or y) are dropped: starts 7..=10.
        assert_eq!(ds.counts().fit, 27 - 4);
    }

    #[test]
    fn target_rule_shapes_y() {
        let mut ds = dataset(
            DatasetConfig::new(4, 3)
                .with_test_ratio(0.0)
                .with_target(Target::Max)
                .with_clip(1e9),
        );
        ds.ingest_series("A", series(&ramp(10)));
        let (x, y) = ds.fit_data();
        assert_eq!(x.dim(), (4, 4));
        assert_eq!(y.dim(), (4, 1));

        let scaler = ds.scaler("A").unwrap();
        // First window's look-ahead is observations 4..7; the max is 106.
        assert!((scaler.inverse(y[[0, 0]]) - 106.0).abs() < 1e-9);
    }

    #[test]
    fn future_and_unscale_round_trip() {
        let values = ramp(30);
        let mut ds = dataset(DatasetConfig::new(5, 1).with_clip(1e9));
        ds.ingest_series("A", series(&values));

        let future = ds.future_data("A").unwrap();
        assert_eq!(future.dim(), (1, 5));
        let restored = ds.unscale_future("A", future.iter()).unwrap();
        for (r, v) in restored.iter().zip(&values[25..]) {
            assert!((r - v).abs() < 1e-9);
        }
        assert_eq!(ds.last_value("A").unwrap(), 129.0);
    }

    #[test]
    fn perfect_predictions_score_zero() {
        let mut ds = dataset(DatasetConfig::new(5, 2).with_test_ratio(0.3).with_clip(1e9));
        ds.ingest_series("A", series(&ramp(40)));
        ds.ingest_series("B", series(&ramp(50)));

        let targets = ds.test_targets();
        assert_eq!(ds.test_data().nrows(), targets.nrows());
        let score = ds.score_test(targets.iter()).unwrap();
        assert_eq!(score.mse, 0.0);
        assert!(score.mape.abs() < 1e-12);
        assert_eq!(score.count, targets.len());
    }

    #[test]
    fn wrong_prediction_count_is_shape_mismatch() {
        let mut ds = dataset(DatasetConfig::new(5, 1).with_clip(1e9));
        ds.ingest_series("A", series(&ramp(40)));
        let err = ds.score_test(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, DatasetError::ShapeMismatch { actual: 2, .. }));
    }

    #[test]
    fn queries_before_ingest_are_not_fitted() {
        let ds = dataset(DatasetConfig::new(5, 1));
        assert!(matches!(ds.future_data("A"), Err(DatasetError::NotFitted)));
        assert!(matches!(
            ds.unscale_future("A", &[1.0]),
            Err(DatasetError::NotFitted)
        ));
        assert!(matches!(
            ds.score_test(Vec::<f64>::new().iter()),
            Err(DatasetError::NotFitted)
        ));
        let (x, y) = ds.fit_data();
        assert_eq!(x.dim(), (0, 5));
        assert_eq!(y.dim(), (0, 1));
    }

    #[test]
    fn unknown_ticker_after_ingest() {
        let mut ds = dataset(DatasetConfig::new(5, 1));
        ds.ingest_series("A", series(&ramp(30)));
        assert!(matches!(
            ds.future_data("ZZZ"),
            Err(DatasetError::UnknownTicker(ref t)) if t == "ZZZ"
        ));
        assert!(matches!(
            ds.unscale_future("ZZZ", &[0.5]),
            Err(DatasetError::UnknownTicker(_))
        ));
    }

    #[test]
    fn all_skipped_ingest_reports_unknown_ticker() {
        let mut ds = dataset(DatasetConfig::new(20, 1));
        ds.ingest_series("SHORT", series(&ramp(5)));
        assert!(ds.tickers().is_empty());
        assert!(matches!(
            ds.future_data("SHORT"),
            Err(DatasetError::UnknownTicker(ref t)) if t == "SHORT"
        ));
        assert!(matches!(
            ds.unscale_future("AAA", &[0.5]),
            Err(DatasetError::UnknownTicker(_))
        ));
        let score = ds.score_test(Vec::<f64>::new().iter()).unwrap();
        assert_eq!(score.count, 0);
        assert!(score.mse.is_nan());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cache = Arc::new(ApiCache::in_memory(KeyChain::new()));
        let err = WindowedDataset::new(cache, DatasetConfig::new(0, 1)).err().unwrap();
        assert!(matches!(err, DatasetError::InvalidParameter(_)));
    }
}
