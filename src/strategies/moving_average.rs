// src/strategies/moving_average.rs
use crate::error::{ConfigError, IndicatorError};
use crate::indicators::{AverageKind, IndicatorCache};
use crate::strategies::traits::Strategy;
use crate::types::{Bar, PriceField, Trend};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const MAX_OPTIONS: usize = 2;

/// One crossover pair: `average(short)` against `average(long)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageOption {
    pub average: AverageKind,
    #[serde(default = "default_price")]
    pub price: PriceField,
    pub short: usize,
    pub long: usize,
}

fn default_price() -> PriceField {
    PriceField::Close
}

impl fmt::Display for MovingAverageOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) {}/{}",
            self.average, self.price, self.short, self.long
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageParams {
    pub options: Vec<MovingAverageOption>,
}

impl fmt::Display for MovingAverageParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options: Vec<String> = self.options.iter().map(|o| o.to_string()).collect();
        f.write_str(&options.join(", "))
    }
}

pub struct MovingAverageStrategy {
    options: Vec<MovingAverageOption>,
    cache: IndicatorCache,
}

impl MovingAverageStrategy {
    pub fn new(params: &MovingAverageParams) -> Result<Self, ConfigError> {
        if params.options.is_empty() || params.options.len() > MAX_OPTIONS {
            return Err(ConfigError::Invalid {
                name: "moving_average.options".to_string(),
                message: format!(
                    "expected 1 to {} options, got {}",
                    MAX_OPTIONS,
                    params.options.len()
                ),
            });
        }
        for option in &params.options {
            if option.short == 0 || option.long == 0 {
                return Err(ConfigError::ZeroPeriod("Moving average".to_string()));
            }
        }

        Ok(Self {
            options: params.options.clone(),
            cache: IndicatorCache::new(),
        })
    }

    fn vote(
        &mut self,
        option: &MovingAverageOption,
        window: &[Bar],
    ) -> Result<Option<Trend>, IndicatorError> {
        let short = self
            .cache
            .moving_average(option.average, window, option.short, option.price)?;
        let long = self
            .cache
            .moving_average(option.average, window, option.long, option.price)?;

        debug!(%option, short, long, "Moving average vote");

        Ok(if short > long {
            Some(Trend::Bullish)
        } else if short < long {
            Some(Trend::Bearish)
        } else {
            None
        })
    }
}

impl Strategy for MovingAverageStrategy {
    fn name(&self) -> &str {
        "Moving Average"
    }

    fn min_period(&self) -> usize {
        self.options
            .iter()
            .map(|o| o.short.max(o.long))
            .max()
            .unwrap_or(0)
    }

    /// Every option has to agree. A split or a flat vote gives no trend.
    fn get_trend(&mut self, window: &[Bar]) -> Result<Option<Trend>, IndicatorError> {
        let options = self.options.clone();
        let mut combined: Option<Trend> = None;

        for (i, option) in options.iter().enumerate() {
            let vote = self.vote(option, window)?;
            if vote.is_none() || (i > 0 && vote != combined) {
                return Ok(None);
            }
            combined = vote;
        }

        Ok(combined)
    }
}
