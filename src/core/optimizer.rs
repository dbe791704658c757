// src/core/optimizer.rs
use crate::config::StrategyConfig;
use crate::core::backtester::{Backtester, Outcome};
use crate::core::events::EventBus;
use crate::core::trader::LossSettings;
use crate::error::{ConfigError, EngineError, Result};
use crate::types::{EngineEvent, LossStrategy};
use crate::utils::intervals::Interval;
use crate::utils::precision::{format_percentage, round_to};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

/// Explicit values, or an inclusive `start..=end` sweep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamRange {
    Values(Vec<f64>),
    Steps { start: f64, end: f64, step: f64 },
}

impl ParamRange {
    pub fn values(&self) -> std::result::Result<Vec<f64>, ConfigError> {
        match *self {
            ParamRange::Values(ref values) => Ok(values.clone()),
            ParamRange::Steps { start, end, step } => {
                if step <= 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "step".to_string(),
                        message: "must be greater than 0".to_string(),
                    });
                }
                // [1, 10, 3] -> 1, 4, 7, 10
                let count = ((end - start) / step + 1e-9).floor();
                if count < 0.0 {
                    return Ok(Vec::new());
                }
                Ok((0..=count as usize)
                    .map(|i| start + step * i as f64)
                    .collect())
            }
        }
    }
}

/// Everything the optimizer sweeps. Missing lists keep the backtester's own
/// setting. Percentages are whole numbers (5 = 5%).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizerGrid {
    #[serde(default)]
    pub loss_types: Vec<LossStrategy>,
    #[serde(default)]
    pub loss_percentages: Option<ParamRange>,
    #[serde(default)]
    pub take_profit_percentages: Option<ParamRange>,
    #[serde(default)]
    pub smart_stop_loss_counters: Vec<u32>,
    #[serde(default)]
    pub strategy_intervals: Vec<Interval>,
    #[serde(default)]
    pub strategies: Vec<Vec<StrategyConfig>>,
}

/// One combination taken from an [`OptimizerGrid`]. `None` keeps what the
/// backtester already has.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub loss: Option<LossSettings>,
    pub take_profit: Option<f64>,
    pub strategy_interval: Option<Interval>,
    pub strategies: Option<Vec<StrategyConfig>>,
}

fn or_keep<T: Clone>(values: &[T]) -> Vec<Option<T>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.iter().cloned().map(Some).collect()
    }
}

impl OptimizerGrid {
    /// Cartesian product of every list in the grid.
    pub fn permutations(&self) -> std::result::Result<Vec<RunSettings>, ConfigError> {
        let loss_percentages = match &self.loss_percentages {
            Some(range) => range.values()?,
            None => Vec::new(),
        };
        if !self.loss_types.is_empty() && loss_percentages.is_empty() {
            return Err(ConfigError::Invalid {
                name: "loss_percentages".to_string(),
                message: "required when loss_types is set".to_string(),
            });
        }
        let take_profits = match &self.take_profit_percentages {
            Some(range) => range.values()?,
            None => Vec::new(),
        };
        let counters = if self.smart_stop_loss_counters.is_empty() {
            vec![0]
        } else {
            self.smart_stop_loss_counters.clone()
        };

        let mut losses: Vec<Option<LossSettings>> = Vec::new();
        if self.loss_types.is_empty() {
            losses.push(None);
        }
        for &strategy in &self.loss_types {
            for &percentage in &loss_percentages {
                for &counter in &counters {
                    losses.push(Some(LossSettings {
                        strategy,
                        percentage: percentage / 100.0,
                        smart_stop_loss_counter: counter,
                        safety_timer: None,
                    }));
                }
            }
        }

        let take_profits: Vec<Option<f64>> = if take_profits.is_empty() {
            vec![None]
        } else {
            take_profits.iter().map(|p| Some(p / 100.0)).collect()
        };

        let mut runs = Vec::new();
        for loss in &losses {
            for &take_profit in &take_profits {
                for strategy_interval in or_keep(&self.strategy_intervals) {
                    for strategies in or_keep(&self.strategies) {
                        runs.push(RunSettings {
                            loss: loss.clone(),
                            take_profit,
                            strategy_interval,
                            strategies,
                        });
                    }
                }
            }
        }
        Ok(runs)
    }
}

/// Result line of one optimizer run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerRow {
    pub profit_percentage: f64,
    pub stop_loss_strategy: String,
    pub stop_loss_percentage: String,
    pub take_profit_percentage: String,
    pub symbol: Option<String>,
    pub interval: String,
    pub strategy_interval: String,
    pub trades: usize,
    pub run: String,
    pub result: Outcome,
    pub strategies: String,
}

/// Brute-force parameter sweep over one data set.
pub struct Optimizer {
    backtester: Backtester,
    rows: Vec<OptimizerRow>,
    events: EventBus,
}

impl Optimizer {
    pub fn new(backtester: Backtester) -> Self {
        Self {
            backtester,
            rows: Vec::new(),
            events: EventBus::disconnected(),
        }
    }

    /// Run summaries go out as messages. Per-bar activity is not sent.
    pub fn set_event_bus(&mut self, events: EventBus) {
        self.events = events;
    }

    pub fn backtester(&self) -> &Backtester {
        &self.backtester
    }

    pub fn rows(&self) -> &[OptimizerRow] {
        &self.rows
    }

    pub fn apply(&mut self, run: &RunSettings) -> std::result::Result<(), ConfigError> {
        let trader = self.backtester.trader_mut();
        if let Some(loss) = &run.loss {
            trader.apply_loss_settings(Some(loss.clone()));
        }
        if run.take_profit.is_some() {
            trader.apply_take_profit(run.take_profit);
        }
        if let Some(interval) = run.strategy_interval {
            self.backtester.change_strategy_interval(interval)?;
        }
        if let Some(strategies) = &run.strategies {
            self.backtester.set_strategies(strategies)?;
        }
        self.backtester.restore()
    }

    /// Runs every combination of `grid`. A crashing strategy marks its row
    /// CRASHED and the sweep moves on; cancellation ends the sweep early.
    pub fn optimize(&mut self, grid: &OptimizerGrid) -> Result<&[OptimizerRow]> {
        let runs = grid.permutations()?;
        let total = runs.len();
        let running = self.backtester.running_flag();
        info!(total, "Starting optimizer");

        for (index, run) in runs.iter().enumerate() {
            if !running.load(Ordering::SeqCst) {
                warn!("Optimizer was canceled.");
                break;
            }
            self.apply(run)?;

            let outcome = match self.backtester.run() {
                Ok(outcome) => outcome,
                Err(EngineError::StrategyCrashed { name, source }) => {
                    error!(strategy = %name, error = %source, "Run crashed, continuing");
                    Outcome::Crashed
                }
                Err(e) if e.is_cancelled() => {
                    warn!("Optimizer was canceled.");
                    break;
                }
                Err(e) => return Err(e),
            };

            let row = self.row(index + 1, total, outcome);
            info!(
                run = %row.run,
                profit = row.profit_percentage,
                result = %row.result,
                "Optimizer run done"
            );
            self.events.send(EngineEvent::Message(format!(
                "Run {}: {}% ({})",
                row.run, row.profit_percentage, row.result
            )));
            self.rows.push(row);
        }

        self.backtester.restore()?;
        Ok(&self.rows)
    }

    fn row(&self, run: usize, total: usize, outcome: Outcome) -> OptimizerRow {
        let trader = self.backtester.trader();
        let settings = trader.settings();
        let strategies = self
            .backtester
            .strategy_configs()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" | ");

        OptimizerRow {
            profit_percentage: round_to(
                trader.get_net() / trader.starting_balance() * 100.0 - 100.0,
                2,
            ),
            stop_loss_strategy: trader.stop_loss_strategy_string(),
            stop_loss_percentage: settings
                .loss
                .as_ref()
                .map_or_else(|| "None".to_string(), |l| format_percentage(l.percentage, 2)),
            take_profit_percentage: settings
                .take_profit
                .map_or_else(|| "None".to_string(), |p| format_percentage(p, 2)),
            symbol: trader.symbol().map(str::to_string),
            interval: self.backtester.interval().to_string(),
            strategy_interval: self.backtester.strategy_interval().to_string(),
            trades: trader.trades().len(),
            run: format!("{}/{}", run, total),
            result: outcome,
            strategies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_inclusive() {
        let range = ParamRange::Steps {
            start: 1.0,
            end: 10.0,
            step: 3.0,
        };
        assert_eq!(range.values().unwrap(), vec![1.0, 4.0, 7.0, 10.0]);

        let zero = ParamRange::Steps {
            start: 1.0,
            end: 2.0,
            step: 0.0,
        };
        assert!(zero.values().is_err());
    }

    #[test]
    fn grid_parses_both_range_forms() {
        let grid: OptimizerGrid = serde_json::from_str(
            r#"{
                "loss_types": ["stop", "trailing"],
                "loss_percentages": {"start": 1, "end": 3, "step": 1},
                "take_profit_percentages": [5, 10],
                "strategy_intervals": ["15m", "1h"]
            }"#,
        )
        .unwrap();
        let runs = grid.permutations().unwrap();
        assert_eq!(runs.len(), 2 * 3 * 2 * 2);
        assert!(runs.iter().all(|r| r.strategies.is_none()));
        assert_eq!(runs[0].loss.as_ref().unwrap().percentage, 0.01);
        assert_eq!(runs[0].take_profit, Some(0.05));
    }

    #[test]
    fn empty_grid_is_a_single_run() {
        let runs = OptimizerGrid::default().permutations().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].loss, None);
        assert_eq!(runs[0].take_profit, None);
    }

    #[test]
    fn loss_types_need_percentages() {
        let grid = OptimizerGrid {
            loss_types: vec![LossStrategy::Stop],
            ..OptimizerGrid::default()
        };
        assert!(grid.permutations().is_err());
    }
}
