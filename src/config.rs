// src/config.rs

use crate::core::backtester::BacktestSettings;
use crate::core::trader::{LossSettings, TraderSettings};
use crate::error::ConfigError;
use crate::strategies;
use crate::strategies::custom::CustomParams;
use crate::strategies::moving_average::MovingAverageParams;
use crate::strategies::shrek::ShrekParams;
use crate::strategies::stoic::StoicParams;
use crate::types::{LossStrategy, TakeProfitType};
use crate::utils::intervals::Interval;
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One configured strategy. Parsed once from the `strategies` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    MovingAverage(MovingAverageParams),
    Stoic(StoicParams),
    Shrek(ShrekParams),
    Custom(CustomParams),
}

impl StrategyConfig {
    pub fn name(&self) -> &str {
        match self {
            StrategyConfig::MovingAverage(_) => "Moving Average",
            StrategyConfig::Stoic(_) => "Stoic",
            StrategyConfig::Shrek(_) => "Shrek",
            StrategyConfig::Custom(params) => &params.name,
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyConfig::MovingAverage(p) => write!(f, "{}: {}", self.name(), p),
            StrategyConfig::Stoic(p) => write!(f, "{}: {}", self.name(), p),
            StrategyConfig::Shrek(p) => write!(f, "{}: {}", self.name(), p),
            StrategyConfig::Custom(p) => write!(f, "{}: {}", self.name(), p),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,
    #[serde(default)]
    pub margin_enabled: bool,

    // Потери: тип и процент (5 = 5%)
    #[serde(default)]
    pub loss_type: Option<LossStrategy>,
    #[serde(default)]
    pub loss_percentage: f64,
    #[serde(default)]
    pub smart_stop_loss_counter: u32,
    // Seconds, 0 = off. Only the simulation driver honours it.
    #[serde(default)]
    pub safety_timer: u64,

    #[serde(default)]
    pub take_profit_type: Option<TakeProfitType>,
    #[serde(default)]
    pub take_profit_percentage: f64,

    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub strategy_interval: Option<Interval>,
    #[serde(default = "default_precision")]
    pub precision: u32,

    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_drawdown_percentage")]
    pub drawdown_percentage: f64,
    #[serde(default = "default_transaction_fee_percentage")]
    pub transaction_fee_percentage: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_starting_balance() -> f64 {
    1000.0
}

fn default_precision() -> u32 {
    2
}

fn default_drawdown_percentage() -> f64 {
    100.0
}

fn default_transaction_fee_percentage() -> f64 {
    0.1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbol: None,
            starting_balance: default_starting_balance(),
            margin_enabled: false,
            loss_type: None,
            loss_percentage: 0.0,
            smart_stop_loss_counter: 0,
            safety_timer: 0,
            take_profit_type: None,
            take_profit_percentage: 0.0,
            strategies: Vec::new(),
            strategy_interval: None,
            precision: default_precision(),
            start_date: None,
            end_date: None,
            drawdown_percentage: default_drawdown_percentage(),
            transaction_fee_percentage: default_transaction_fee_percentage(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    /// `path` without extension picks up Settings.toml / .json / .yaml.
    /// `APP_*` environment variables override file values.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APP").try_parsing(true));

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.starting_balance > 0.0) {
            return Err(invalid("starting_balance", "must be greater than 0"));
        }
        if self.loss_type.is_some() && !(self.loss_percentage > 0.0 && self.loss_percentage < 100.0)
        {
            return Err(invalid("loss_percentage", "must be between 0 and 100"));
        }
        match self.take_profit_type {
            Some(TakeProfitType::Trailing) => {
                return Err(ConfigError::UnsupportedTakeProfit(
                    TakeProfitType::Trailing.to_string(),
                ))
            }
            Some(TakeProfitType::Stop) if !(self.take_profit_percentage > 0.0) => {
                return Err(invalid("take_profit_percentage", "must be greater than 0"));
            }
            _ => {}
        }
        if !(0.0..=100.0).contains(&self.drawdown_percentage) {
            return Err(invalid("drawdown_percentage", "must be between 0 and 100"));
        }
        if !(0.0..100.0).contains(&self.transaction_fee_percentage) {
            return Err(invalid("transaction_fee_percentage", "must be between 0 and 100"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPeriod("Poll interval".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ConfigError::EndBeforeStart);
            }
        }
        strategies::build_all(&self.strategies)?;
        Ok(())
    }

    pub fn trader_settings(&self) -> Result<TraderSettings, ConfigError> {
        let take_profit = match self.take_profit_type {
            None => None,
            Some(TakeProfitType::Stop) => Some(self.take_profit_percentage / 100.0),
            Some(other) => return Err(ConfigError::UnsupportedTakeProfit(other.to_string())),
        };

        let loss = self.loss_type.map(|strategy| LossSettings {
            strategy,
            percentage: self.loss_percentage / 100.0,
            smart_stop_loss_counter: self.smart_stop_loss_counter,
            safety_timer: (self.safety_timer > 0)
                .then(|| chrono::Duration::seconds(self.safety_timer as i64)),
        });

        Ok(TraderSettings {
            symbol: self.symbol.clone(),
            starting_balance: self.starting_balance,
            precision: self.precision,
            margin_enabled: self.margin_enabled,
            transaction_fee: self.transaction_fee_percentage / 100.0,
            loss,
            take_profit,
        })
    }

    pub fn backtest_settings(&self) -> Result<BacktestSettings, ConfigError> {
        Ok(BacktestSettings {
            trader: self.trader_settings()?,
            strategies: self.strategies.clone(),
            strategy_interval: self.strategy_interval,
            start_date: self.start_date,
            end_date: self.end_date,
            drawdown_percentage: self.drawdown_percentage,
        })
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        let settings = config.trader_settings().unwrap();
        assert_eq!(settings.transaction_fee, 0.001);
        assert!(settings.loss.is_none());
    }

    #[test]
    fn trailing_take_profit_is_rejected() {
        let config = AppConfig {
            take_profit_type: Some(TakeProfitType::Trailing),
            take_profit_percentage: 5.0,
            ..AppConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedTakeProfit("Trailing".to_string()))
        );
        assert!(config.trader_settings().is_err());
    }

    #[test]
    fn percentages_become_decimals() {
        let config = AppConfig {
            loss_type: Some(LossStrategy::Trailing),
            loss_percentage: 5.0,
            smart_stop_loss_counter: 2,
            safety_timer: 30,
            take_profit_type: Some(TakeProfitType::Stop),
            take_profit_percentage: 10.0,
            ..AppConfig::default()
        };
        let settings = config.trader_settings().unwrap();
        let loss = settings.loss.unwrap();
        assert_eq!(loss.percentage, 0.05);
        assert_eq!(loss.smart_stop_loss_counter, 2);
        assert_eq!(loss.safety_timer, Some(chrono::Duration::seconds(30)));
        assert_eq!(settings.take_profit, Some(0.1));
    }

    #[test]
    fn strategies_deserialize_from_tagged_list() {
        let json = r#"[
            {"type": "moving_average", "options": [
                {"average": "ema", "price": "close", "short": 9, "long": 21}
            ]},
            {"type": "stoic", "input1": 14, "input2": 9, "input3": 5,
             "bullish_threshold": 0.8, "bearish_threshold": 0.2}
        ]"#;
        let parsed: Vec<StrategyConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name(), "Moving Average");
        assert_eq!(parsed[1].name(), "Stoic");
        assert!(strategies::build_all(&parsed).is_ok());
    }

    #[test]
    fn loads_settings_file() {
        let dir = std::env::temp_dir().join(format!("algotrail-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Settings.toml");
        std::fs::write(
            &path,
            r#"
starting_balance = 2500.0
margin_enabled = true
loss_type = "stop"
loss_percentage = 3.0
strategy_interval = "1h"

[[strategies]]
type = "moving_average"
options = [{ average = "sma", short = 5, long = 20 }]
"#,
        )
        .unwrap();

        let base = dir.join("Settings");
        let config = AppConfig::load(base.to_str().unwrap()).unwrap();
        assert_eq!(config.starting_balance, 2500.0);
        assert!(config.margin_enabled);
        assert_eq!(config.loss_type, Some(LossStrategy::Stop));
        assert_eq!(config.strategy_interval.map(|i| i.minutes()), Some(60));
        assert_eq!(config.strategies.len(), 1);
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }
}
