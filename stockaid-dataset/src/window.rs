//! Sliding (look-back, look-ahead) windows over one series.

use std::ops::Range;

/// Number of windows in a series of length `len`: `max(0, len - B - A + 1)`.
pub fn window_count(len: usize, look_back: usize, look_ahead: usize) -> usize {
    (len + 1).saturating_sub(look_back + look_ahead)
}

/// One window's index ranges into the series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpan {
    pub start: usize,
    pub x: Range<usize>,
    pub y: Range<usize>,
}

/// Window `i` covers `[i, i+B)` as X and `[i+B, i+B+A)` as y.
pub fn spans(len: usize, look_back: usize, look_ahead: usize) -> impl Iterator<Item = WindowSpan> {
    (0..window_count(len, look_back, look_ahead)).map(move |i| WindowSpan {
        start: i,
        x: i..i + look_back,
        y: i + look_back..i + look_back + look_ahead,
    })
}

/// Observations in the trailing test region: `round(len * test_ratio)`,
/// leaving at least one training observation.
pub fn test_len(len: usize, test_ratio: f64) -> usize {
    let n = (len as f64 * test_ratio).round() as usize;
    n.min(len.saturating_sub(1))
}
