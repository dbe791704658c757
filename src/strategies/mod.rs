// src/strategies/mod.rs
pub mod custom;
pub mod moving_average;
pub mod shrek;
pub mod stoic;
pub mod traits;

use crate::config::StrategyConfig;
use crate::error::{ConfigError, EngineError};
use crate::types::{Bar, Trend};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::error;

pub use traits::Strategy;

pub fn build(config: &StrategyConfig) -> Result<Box<dyn Strategy>, ConfigError> {
    Ok(match config {
        StrategyConfig::MovingAverage(params) => {
            Box::new(moving_average::MovingAverageStrategy::new(params)?)
        }
        StrategyConfig::Stoic(params) => Box::new(stoic::StoicStrategy::new(params)?),
        StrategyConfig::Shrek(params) => Box::new(shrek::ShrekStrategy::new(params)?),
        StrategyConfig::Custom(params) => Box::new(custom::CustomStrategy::new(params)?),
    })
}

pub fn build_all(configs: &[StrategyConfig]) -> Result<Vec<Box<dyn Strategy>>, ConfigError> {
    configs.iter().map(build).collect()
}

pub fn min_period(strategies: &[Box<dyn Strategy>]) -> usize {
    strategies.iter().map(|s| s.min_period()).max().unwrap_or(0)
}

/// Folds per-strategy trends into one. Plain BULLISH/BEARISH need every
/// strategy to agree; the enter/exit trends accept the matching plain trend
/// alongside them. A missing trend anywhere gives None.
pub fn cumulative_trend(trends: &[Option<Trend>]) -> Option<Trend> {
    use Trend::*;

    if trends.is_empty() {
        return None;
    }
    let all_in = |allowed: &[Trend]| {
        trends
            .iter()
            .all(|t| matches!(t, Some(trend) if allowed.contains(trend)))
    };

    if all_in(&[Bearish]) {
        Some(Bearish)
    } else if all_in(&[Bullish]) {
        Some(Bullish)
    } else if all_in(&[Bullish, EnterLong]) {
        Some(EnterLong)
    } else if all_in(&[Bearish, ExitLong]) {
        Some(ExitLong)
    } else if all_in(&[Bullish, ExitShort]) {
        Some(ExitShort)
    } else if all_in(&[Bearish, EnterShort]) {
        Some(EnterShort)
    } else {
        None
    }
}

/// Mean of the last `capacity` per-bar values. A second value for the bar
/// seen last replaces its entry.
#[derive(Debug, Clone)]
pub(crate) struct BarMean {
    capacity: usize,
    values: VecDeque<f64>,
    last_bar: Option<DateTime<Utc>>,
}

impl BarMean {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            last_bar: None,
        }
    }

    pub(crate) fn update(&mut self, bar: DateTime<Utc>, value: f64) -> f64 {
        match self.values.back_mut() {
            Some(back) if self.last_bar == Some(bar) => *back = value,
            _ => {
                if self.values.len() == self.capacity {
                    self.values.pop_front();
                }
                self.values.push_back(value);
                self.last_bar = Some(bar);
            }
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

/// Asks every strategy for its trend on `window` and combines the answers.
pub fn evaluate(
    strategies: &mut [Box<dyn Strategy>],
    window: &[Bar],
) -> Result<Option<Trend>, EngineError> {
    let mut trends = Vec::with_capacity(strategies.len());
    for strategy in strategies.iter_mut() {
        match strategy.get_trend(window) {
            Ok(trend) => trends.push(trend),
            Err(source) => {
                error!(strategy = strategy.name(), error = %source, "Strategy crashed");
                return Err(EngineError::StrategyCrashed {
                    name: strategy.name().to_string(),
                    source,
                });
            }
        }
    }
    Ok(cumulative_trend(&trends))
}
