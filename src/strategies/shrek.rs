// src/strategies/shrek.rs
use crate::error::{ConfigError, IndicatorError};
use crate::indicators::{stochastic, IndicatorCache};
use crate::strategies::traits::Strategy;
use crate::strategies::BarMean;
use crate::types::{Bar, PriceField, Trend};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShrekParams {
    pub one: usize,
    pub two: usize,
    pub three: usize,
    pub four: usize,
    pub lower: f64,
    pub upper: f64,
}

impl fmt::Display for ShrekParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RSI {} over {}, mean of {}, companion RSI {}, bounds {}/{}",
            self.one, self.two, self.three, self.four, self.lower, self.upper
        )
    }
}

/// Stochastic of RSI(`one`) over its last `two` values, smoothed over
/// `three` bars. The smoothed ratio must sit outside the bounds, the raw
/// ratio must cross it and RSI(`four`) must move the same way.
pub struct ShrekStrategy {
    params: ShrekParams,
    cache: IndicatorCache,
    ratios: BarMean,
}

impl ShrekStrategy {
    pub fn new(params: &ShrekParams) -> Result<Self, ConfigError> {
        if params.one == 0 || params.two == 0 || params.three == 0 || params.four == 0 {
            return Err(ConfigError::ZeroPeriod("Shrek".to_string()));
        }
        if params.lower > params.upper {
            return Err(ConfigError::Invalid {
                name: "shrek.lower".to_string(),
                message: format!("{} is above upper bound {}", params.lower, params.upper),
            });
        }
        Ok(Self {
            params: params.clone(),
            cache: IndicatorCache::new(),
            ratios: BarMean::new(params.three),
        })
    }
}

impl Strategy for ShrekStrategy {
    fn name(&self) -> &str {
        "Shrek"
    }

    fn min_period(&self) -> usize {
        let p = &self.params;
        p.one.max(p.two).max(p.four).max(2) + 1
    }

    fn get_trend(&mut self, window: &[Bar]) -> Result<Option<Trend>, IndicatorError> {
        let p = &self.params;
        let bar = window
            .last()
            .ok_or(IndicatorError::NotEnoughData { needed: 1, got: 0 })?;

        self.cache.rsi(window, p.one, PriceField::Close, 0)?;
        let history = self.cache.rsi_history(p.one, PriceField::Close, p.two)?;
        let ratio = stochastic(&history).ok_or(IndicatorError::NotEnoughData {
            needed: p.two,
            got: 0,
        })?;

        let smoothed = self.ratios.update(bar.timestamp, ratio);

        let companion = self.cache.rsi(window, p.four, PriceField::Close, 0)?;
        let previous = self.cache.rsi(window, p.four, PriceField::Close, 1)?;

        let trend = if smoothed < p.lower && ratio > smoothed && companion > previous {
            Some(Trend::Bullish)
        } else if smoothed > p.upper && ratio < smoothed && companion < previous {
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

    fn params() -> ShrekParams {
        ShrekParams {
            one: 3,
            two: 3,
            three: 4,
            four: 3,
            lower: 0.3,
            upper: 0.7,
        }
    }

    #[test]
    fn rebound_after_sell_off_is_bullish() {
        let mut strategy = ShrekStrategy::new(&params()).unwrap();
        let series = bars(&[10.0, 12.0, 14.0, 16.0, 15.0, 14.0, 13.0, 12.0, 16.0]);

        let mut trends = Vec::new();
        for end in strategy.min_period()..=series.len() {
            trends.push(strategy.get_trend(&series[..end]).unwrap());
        }

        assert!(trends[..trends.len() - 1].iter().all(|t| *t != Some(Trend::Bullish)));
        assert_eq!(trends.last().copied().flatten(), Some(Trend::Bullish));
    }

    #[test]
    fn validates_params() {
        let mut bad = params();
        bad.two = 0;
        assert!(ShrekStrategy::new(&bad).is_err());

        let mut inverted = params();
        inverted.lower = 0.9;
        assert!(ShrekStrategy::new(&inverted).is_err());
    }
}
