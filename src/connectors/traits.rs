// src/connectors/traits.rs
use crate::types::Bar;
use anyhow::Result;
use async_trait::async_trait;

/// Source of prices for the simulation driver. Implementations own their
/// polling and retry concerns; the engine only reads through this trait.
#[async_trait]
pub trait PriceFeed: Send {
    async fn current_price(&mut self) -> Result<f64>;

    /// True when the newest bar has closed and `bars()` is out of date.
    fn needs_refresh(&self) -> bool;

    async fn refresh(&mut self) -> Result<()>;

    /// Closed bars, oldest first.
    fn bars(&self) -> &[Bar];

    /// Finite feeds (replays) report when nothing is left.
    fn is_finished(&self) -> bool {
        false
    }
}
