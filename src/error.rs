// src/error.rs
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Problems with run settings. Raised at setup time, never corrected silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No price data was provided.")]
    EmptyData,

    #[error("Unknown interval: {0}")]
    UnknownInterval(String),

    #[error("Your strategy interval ({strategy} minute(s)) can't be smaller than the data interval ({data} minute(s)).")]
    StrategyIntervalTooSmall { strategy: u32, data: u32 },

    #[error("Date not found: {0}")]
    DateNotFound(NaiveDate),

    #[error("You need at least one data period.")]
    NotEnoughPeriods,

    #[error("Ending date index cannot be less than or equal to start date index.")]
    EndBeforeStart,

    #[error("{0} periods must be greater than 0.")]
    ZeroPeriod(String),

    #[error("Unsupported take profit type: {0}")]
    UnsupportedTakeProfit(String),

    #[error("Invalid setting {name}: {message}")]
    Invalid { name: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("Period must be greater than 0.")]
    ZeroPeriod,

    #[error("Not enough data periods. Need {needed}, got {got}.")]
    NotEnoughData { needed: usize, got: usize },

    #[error("Cached value at {cached} is newer than requested bar at {requested}.")]
    StaleBar {
        cached: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error("RSI({period}) history holds {available} values, shift {shift} is out of range.")]
    ShiftOutOfRange {
        period: usize,
        shift: usize,
        available: usize,
    },
}

/// Top-level error of the trading engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error("It looks like your strategy has crashed because of: \"{source}\". Try using different parameters or rewriting your strategy. The strategy that caused this crash is: {name}.")]
    StrategyCrashed {
        name: String,
        #[source]
        source: IndicatorError,
    },

    #[error("No current price set for the trader.")]
    MissingPrice,

    #[error("{0} was canceled.")]
    Cancelled(&'static str),

    #[error("Price feed error: {0}")]
    Feed(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
