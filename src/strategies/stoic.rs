// src/strategies/stoic.rs
use crate::error::{ConfigError, IndicatorError};
use crate::indicators::{stochastic, IndicatorCache};
use crate::strategies::traits::Strategy;
use crate::strategies::BarMean;
use crate::types::{Bar, PriceField, Trend};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two stochastic RSI ratios. The first is compared against its own rolling
/// mean, the second against fixed bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoicParams {
    pub input1: usize,
    pub input2: usize,
    pub input3: usize,
    pub bullish_threshold: f64,
    pub bearish_threshold: f64,
}

impl fmt::Display for StoicParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RSI {}/{}, mean of {}, bounds {}/{}",
            self.input1, self.input2, self.input3, self.bullish_threshold, self.bearish_threshold
        )
    }
}

pub struct StoicStrategy {
    params: StoicParams,
    cache: IndicatorCache,
    ratios: BarMean,
}

impl StoicStrategy {
    pub fn new(params: &StoicParams) -> Result<Self, ConfigError> {
        if params.input1 == 0 || params.input2 == 0 || params.input3 == 0 {
            return Err(ConfigError::ZeroPeriod("Stoic".to_string()));
        }
        Ok(Self {
            params: params.clone(),
            cache: IndicatorCache::new(),
            ratios: BarMean::new(params.input3),
        })
    }

    fn rsi_ratio(&mut self, window: &[Bar], period: usize) -> Result<f64, IndicatorError> {
        self.cache.rsi(window, period, PriceField::Close, 0)?;
        let history = self.cache.rsi_history(period, PriceField::Close, period)?;
        stochastic(&history).ok_or(IndicatorError::NotEnoughData {
            needed: period,
            got: 0,
        })
    }
}

impl Strategy for StoicStrategy {
    fn name(&self) -> &str {
        "Stoic"
    }

    fn min_period(&self) -> usize {
        self.params.input1.max(self.params.input2) + 1
    }

    fn get_trend(&mut self, window: &[Bar]) -> Result<Option<Trend>, IndicatorError> {
        let bar = window
            .last()
            .ok_or(IndicatorError::NotEnoughData { needed: 1, got: 0 })?;
        let first = self.rsi_ratio(window, self.params.input1)?;
        let second = self.rsi_ratio(window, self.params.input2)?;

        let mean = self.ratios.update(bar.timestamp, first);

        let trend = if first > mean && second > self.params.bullish_threshold {
            Some(Trend::Bullish)
        } else if first < mean && second < self.params.bearish_threshold {
            Some(Trend::Bearish)
        } else {
            None
        };
        Ok(trend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(prices: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Bar::flat(start + Duration::hours(i as i64), *p))
            .collect()
    }

    fn params() -> StoicParams {
        StoicParams {
            input1: 3,
            input2: 4,
            input3: 3,
            bullish_threshold: 0.5,
            bearish_threshold: 0.5,
        }
    }

    #[test]
    fn turn_up_after_decline_is_bullish() {
        let mut strategy = StoicStrategy::new(&params()).unwrap();
        let mut prices = vec![20.0, 19.0, 18.0, 17.0, 16.0, 15.0];
        let series = bars(&prices);
        let mut trend = None;
        for end in strategy.min_period()..=series.len() {
            trend = strategy.get_trend(&series[..end]).unwrap();
        }
        // steady decline: no ratio has moved above its own mean
        assert_ne!(trend, Some(Trend::Bullish));

        prices.extend([19.0, 23.0]);
        let series = bars(&prices);
        for end in 7..=series.len() {
            trend = strategy.get_trend(&series[..end]).unwrap();
        }
        assert_eq!(trend, Some(Trend::Bullish));
    }

    #[test]
    fn needs_enough_history() {
        let mut strategy = StoicStrategy::new(&params()).unwrap();
        let series = bars(&[1.0, 2.0, 3.0]);
        assert!(strategy.get_trend(&series).is_err());
        assert_eq!(strategy.min_period(), 5);
    }

    #[test]
    fn rejects_zero_inputs() {
        let mut bad = params();
        bad.input3 = 0;
        assert!(StoicStrategy::new(&bad).is_err());
    }
}
