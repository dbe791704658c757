// src/indicators/rsi.rs
use crate::error::IndicatorError;
use crate::types::{Bar, PriceField};
use chrono::{DateTime, Utc};

/// How far back the bulk path looks on top of the period itself.
pub const RSI_LOOKBACK: usize = 500;

/// Smoothed state after one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiPoint {
    pub value: f64,
    pub up: f64,
    pub down: f64,
    pub timestamp: DateTime<Utc>,
}

fn rsi_from(up: f64, down: f64) -> f64 {
    if down == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + up / down)
}

/// Advances Wilder's averages by one price change.
pub(crate) fn step(
    prev_up: f64,
    prev_down: f64,
    diff: f64,
    period: usize,
    timestamp: DateTime<Utc>,
) -> RsiPoint {
    let alpha = 1.0 / period as f64;
    let (up, down) = if diff > 0.0 {
        (diff * alpha + prev_up * (1.0 - alpha), prev_down * (1.0 - alpha))
    } else {
        (prev_up * (1.0 - alpha), -diff * alpha + prev_down * (1.0 - alpha))
    };
    RsiPoint {
        value: rsi_from(up, down),
        up,
        down,
        timestamp,
    }
}

/// Full RSI walk over (at most) the last `RSI_LOOKBACK + period` bars.
/// The first bar contributes a zero change. One point per bar after it.
pub fn rsi_path(
    window: &[Bar],
    period: usize,
    field: PriceField,
) -> Result<Vec<RsiPoint>, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::ZeroPeriod);
    }
    if window.len() < 2 {
        return Err(IndicatorError::NotEnoughData {
            needed: 2,
            got: window.len(),
        });
    }

    let start = window.len().saturating_sub(RSI_LOOKBACK + period);
    let bars = &window[start..];

    let mut up = 0.0;
    let mut down = 0.0;
    let mut points = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let diff = field.value(&pair[1]) - field.value(&pair[0]);
        let point = step(up, down, diff, period, pair[1].timestamp);
        up = point.up;
        down = point.down;
        points.push(point);
    }
    Ok(points)
}

/// RSI of the bar `shift` positions before the last one, without caching.
pub fn rsi(
    window: &[Bar],
    period: usize,
    field: PriceField,
    shift: usize,
) -> Result<f64, IndicatorError> {
    let end = window.len().saturating_sub(shift);
    let points = rsi_path(&window[..end], period, field)?;
    points
        .last()
        .map(|p| p.value)
        .ok_or(IndicatorError::NotEnoughData {
            needed: 2,
            got: end,
        })
}

/// Position of the newest value inside the series' range, in `[0, 1]`.
/// A flat series sits at 0.5.
pub fn stochastic(values: &[f64]) -> Option<f64> {
    let current = *values.last()?;
    let (low, high) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = high - low;
    if range == 0.0 {
        return Some(0.5);
    }
    Some((current - low) / range)
}
