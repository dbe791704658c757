// src/indicators/moving_average.rs
use crate::error::IndicatorError;
use crate::types::{Bar, PriceField};
use chrono::{DateTime, Utc};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

/// One step of a cached EMA path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn tail(window: &[Bar], period: usize) -> Result<&[Bar], IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::ZeroPeriod);
    }
    if window.len() < period {
        return Err(IndicatorError::NotEnoughData {
            needed: period,
            got: window.len(),
        });
    }
    Ok(&window[window.len() - period..])
}

/// Mean of the most recent `period` bars.
pub fn sma(window: &[Bar], period: usize, field: PriceField) -> Result<f64, IndicatorError> {
    let bars = tail(window, period)?;
    let mut indicator =
        SimpleMovingAverage::new(period).map_err(|_| IndicatorError::ZeroPeriod)?;
    let mut value = 0.0;
    for bar in bars {
        value = indicator.next(field.value(bar));
    }
    Ok(value)
}

/// Linearly weighted mean: newest bar weighs `period`, oldest weighs 1.
pub fn wma(window: &[Bar], period: usize, field: PriceField) -> Result<f64, IndicatorError> {
    let bars = tail(window, period)?;
    let (last, rest) = bars
        .split_last()
        .ok_or(IndicatorError::NotEnoughData { needed: 1, got: 0 })?;

    let mut total = field.value(last) * period as f64;
    for (weight, bar) in rest.iter().enumerate() {
        total += (weight + 1) as f64 * field.value(bar);
    }

    let divisor = (period * (period + 1)) as f64 / 2.0;
    Ok(total / divisor)
}

/// EMA over the whole window: seeded with the SMA of the first `seed_len`
/// bars, then walked forward with multiplier `2 / (period + 1)`.
/// Returns the final value and every intermediate point.
pub fn ema_path(
    window: &[Bar],
    period: usize,
    field: PriceField,
    seed_len: usize,
) -> Result<(f64, Vec<EmaPoint>), IndicatorError> {
    if period == 0 || seed_len == 0 {
        return Err(IndicatorError::ZeroPeriod);
    }
    if window.is_empty() {
        return Err(IndicatorError::NotEnoughData { needed: 1, got: 0 });
    }

    let seed_len = if seed_len > window.len() {
        (window.len() - 1).max(1)
    } else {
        seed_len
    };

    let multiplier = ema_multiplier(period);
    let (seed, rest) = window.split_at(seed_len);
    let mut ema = seed.iter().map(|bar| field.value(bar)).sum::<f64>() / seed_len as f64;

    let mut points = Vec::with_capacity(window.len() - seed_len + 1);
    points.push(EmaPoint {
        value: ema,
        timestamp: seed[seed_len - 1].timestamp,
    });

    for bar in rest {
        ema = field.value(bar) * multiplier + ema * (1.0 - multiplier);
        points.push(EmaPoint {
            value: ema,
            timestamp: bar.timestamp,
        });
    }

    Ok((ema, points))
}

pub fn ema(
    window: &[Bar],
    period: usize,
    field: PriceField,
    seed_len: usize,
) -> Result<f64, IndicatorError> {
    ema_path(window, period, field, seed_len).map(|(value, _)| value)
}

pub(crate) fn ema_multiplier(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn closes(prices: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Bar::flat(start + Duration::minutes(i as i64), *p))
            .collect()
    }

    #[test]
    fn sma_uses_most_recent_bars() {
        let bars = closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(sma(&bars, 3, PriceField::Close).unwrap(), 4.0);
        assert_eq!(sma(&bars, 5, PriceField::Close).unwrap(), 3.0);
    }

    #[test]
    fn wma_weights_newest_heaviest() {
        let bars = closes(&[1.0, 2.0, 3.0]);
        // (1*1 + 2*2 + 3*3) / 6
        let value = wma(&bars, 3, PriceField::Close).unwrap();
        assert!((value - 14.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn ema_seeds_with_sma() {
        let bars = closes(&[10.0, 11.0, 12.0, 13.0]);
        // seed = (10 + 11) / 2 = 10.5, multiplier = 0.5
        // 12 -> 11.25, 13 -> 12.125
        let (value, points) = ema_path(&bars, 3, PriceField::Close, 2).unwrap();
        assert!((value - 12.125).abs() < 1e-12);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, bars[1].timestamp);
    }

    #[test]
    fn rejects_short_windows_and_zero_periods() {
        let bars = closes(&[1.0, 2.0]);
        assert_eq!(
            sma(&bars, 3, PriceField::Close),
            Err(IndicatorError::NotEnoughData { needed: 3, got: 2 })
        );
        assert_eq!(wma(&bars, 0, PriceField::Close), Err(IndicatorError::ZeroPeriod));
        assert_eq!(ema(&bars, 3, PriceField::Close, 0), Err(IndicatorError::ZeroPeriod));
    }
}
