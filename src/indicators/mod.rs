// src/indicators/mod.rs
pub mod moving_average;
pub mod rsi;

use crate::error::IndicatorError;
use crate::types::{Bar, PriceField};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use moving_average::{ema, ema_path, sma, wma, EmaPoint};
pub use rsi::{rsi, rsi_path, stochastic, RsiPoint};

/// Seed length the crossover strategies use for EMA.
pub const DEFAULT_EMA_SEED: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageKind {
    Sma,
    Ema,
    Wma,
}

impl fmt::Display for AverageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageKind::Sma => f.write_str("SMA"),
            AverageKind::Ema => f.write_str("EMA"),
            AverageKind::Wma => f.write_str("WMA"),
        }
    }
}

/// Incremental EMA / RSI state, keyed by (period, price field).
///
/// The first call for a key walks the window in bulk. Later calls only look
/// at the newest bar: a newer timestamp appends a point, the same timestamp
/// recomputes the last point from the one before it, so asking twice about one
/// bar gives one point. A still-forming bar therefore has to keep one
/// timestamp until it is final. Older timestamps are rejected.
#[derive(Debug, Default, Clone)]
pub struct IndicatorCache {
    ema: HashMap<(usize, PriceField), Vec<EmaPoint>>,
    rsi: HashMap<(usize, PriceField), Vec<RsiPoint>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.ema.clear();
        self.rsi.clear();
    }

    pub fn moving_average(
        &mut self,
        kind: AverageKind,
        window: &[Bar],
        period: usize,
        field: PriceField,
    ) -> Result<f64, IndicatorError> {
        match kind {
            AverageKind::Sma => sma(window, period, field),
            AverageKind::Wma => wma(window, period, field),
            AverageKind::Ema => {
                let recent = moving_average::tail(window, period)?;
                self.ema(recent, period, field, DEFAULT_EMA_SEED)
            }
        }
    }

    pub fn ema(
        &mut self,
        window: &[Bar],
        period: usize,
        field: PriceField,
        seed_len: usize,
    ) -> Result<f64, IndicatorError> {
        let bar = window
            .last()
            .ok_or(IndicatorError::NotEnoughData { needed: 1, got: 0 })?;

        let points = match self.ema.get_mut(&(period, field)) {
            Some(points) if !points.is_empty() => points,
            _ => {
                let (value, points) = ema_path(window, period, field, seed_len)?;
                self.ema.insert((period, field), points);
                return Ok(value);
            }
        };

        let multiplier = moving_average::ema_multiplier(period);
        let price = field.value(bar);
        let len = points.len();
        let last = points[len - 1];

        if last.timestamp == bar.timestamp {
            if len < 2 {
                let (value, rebuilt) = ema_path(window, period, field, seed_len)?;
                *points = rebuilt;
                return Ok(value);
            }
            let value = price * multiplier + points[len - 2].value * (1.0 - multiplier);
            points[len - 1].value = value;
            Ok(value)
        } else if last.timestamp < bar.timestamp {
            let value = price * multiplier + last.value * (1.0 - multiplier);
            points.push(EmaPoint {
                value,
                timestamp: bar.timestamp,
            });
            Ok(value)
        } else {
            Err(IndicatorError::StaleBar {
                cached: last.timestamp,
                requested: bar.timestamp,
            })
        }
    }

    /// RSI at the newest bar (`shift == 0`) or `shift` bars before it.
    pub fn rsi(
        &mut self,
        window: &[Bar],
        period: usize,
        field: PriceField,
        shift: usize,
    ) -> Result<f64, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::ZeroPeriod);
        }

        if shift > 0 {
            return match self.rsi.get(&(period, field)) {
                Some(points) if !points.is_empty() => points
                    .len()
                    .checked_sub(1 + shift)
                    .map(|idx| points[idx].value)
                    .ok_or(IndicatorError::ShiftOutOfRange {
                        period,
                        shift,
                        available: points.len(),
                    }),
                _ => rsi(window, period, field, shift),
            };
        }

        let points = match self.rsi.get_mut(&(period, field)) {
            Some(points) if !points.is_empty() => points,
            _ => {
                let points = rsi_path(window, period, field)?;
                let value = points.last().map(|p| p.value).unwrap_or(100.0);
                self.rsi.insert((period, field), points);
                return Ok(value);
            }
        };

        let len = window.len();
        if len < 2 {
            return Err(IndicatorError::NotEnoughData { needed: 2, got: len });
        }
        let bar = &window[len - 1];
        let diff = field.value(bar) - field.value(&window[len - 2]);
        let last = points[points.len() - 1];

        if last.timestamp == bar.timestamp {
            if points.len() < 2 {
                let rebuilt = rsi_path(window, period, field)?;
                let value = rebuilt.last().map(|p| p.value).unwrap_or(100.0);
                *points = rebuilt;
                return Ok(value);
            }
            let prev = points[points.len() - 2];
            let point = rsi::step(prev.up, prev.down, diff, period, bar.timestamp);
            let idx = points.len() - 1;
            points[idx] = point;
            Ok(point.value)
        } else if last.timestamp < bar.timestamp {
            let point = rsi::step(last.up, last.down, diff, period, bar.timestamp);
            points.push(point);
            Ok(point.value)
        } else {
            Err(IndicatorError::StaleBar {
                cached: last.timestamp,
                requested: bar.timestamp,
            })
        }
    }

    /// The most recent `count` cached RSI values, oldest first.
    pub fn rsi_history(
        &self,
        period: usize,
        field: PriceField,
        count: usize,
    ) -> Result<Vec<f64>, IndicatorError> {
        let points = self
            .rsi
            .get(&(period, field))
            .map(Vec::as_slice)
            .unwrap_or_default();
        if points.len() < count {
            return Err(IndicatorError::NotEnoughData {
                needed: count,
                got: points.len(),
            });
        }
        Ok(points[points.len() - count..]
            .iter()
            .map(|p| p.value)
            .collect())
    }
}
