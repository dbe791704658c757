// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLC price period. `timestamp` is the start of the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    /// Bar where every price equals `price`. Handy for ticks and tests.
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self::new(timestamp, price, price, price, price)
    }
}

impl ta::Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Which price of a bar an indicator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceField {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "high/low")]
    HighLow,
    #[serde(rename = "open/close")]
    OpenClose,
}

impl PriceField {
    pub fn value<T>(&self, item: &T) -> f64
    where
        T: ta::Open + ta::High + ta::Low + ta::Close,
    {
        match self {
            PriceField::Open => item.open(),
            PriceField::High => item.high(),
            PriceField::Low => item.low(),
            PriceField::Close => item.close(),
            PriceField::HighLow => (item.high() + item.low()) / 2.0,
            PriceField::OpenClose => (item.open() + item.close()) / 2.0,
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
            PriceField::HighLow => "high/low",
            PriceField::OpenClose => "open/close",
        };
        f.write_str(s)
    }
}

/// Directional signal a strategy produces for a bar. "No trend" is `None`
/// at the use sites (`Option<Trend>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bullish,
    Bearish,
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Bullish => "Bullish",
            Trend::Bearish => "Bearish",
            Trend::EnterLong => "Enter Long",
            Trend::ExitLong => "Exit Long",
            Trend::EnterShort => "Enter Short",
            Trend::ExitShort => "Exit Short",
        };
        f.write_str(s)
    }
}

/// Market exposure. Being flat is `None` at the use sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    Long,
    Short,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Long => f.write_str("Long"),
            Position::Short => f.write_str("Short"),
        }
    }
}

/// Append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub net: f64,
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: (${}) {}",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.net,
            self.action
        )
    }
}

/// Periodic progress snapshot handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    pub price: String,
    pub net: f64,
    pub net_string: String,
    pub balance: String,
    pub commissions_paid: String,
    pub trades_made: usize,
    pub profit: String,
    pub profit_percentage: String,
    pub current_period: String,
    pub utc: i64,
    pub percentage: u8,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Activity(ActivitySnapshot),
    Trade(TradeRecord),
    Message(String),
}

/// How the stop-loss level is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossStrategy {
    /// Fixed distance from the entry price.
    Stop,
    /// Fixed distance from the best price seen since entry.
    Trailing,
}

impl fmt::Display for LossStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossStrategy::Stop => f.write_str("Stop Loss"),
            LossStrategy::Trailing => f.write_str("Trailing Loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakeProfitType {
    Stop,
    Trailing,
}

impl fmt::Display for TakeProfitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeProfitType::Stop => f.write_str("Stop"),
            TakeProfitType::Trailing => f.write_str("Trailing"),
        }
    }
}
