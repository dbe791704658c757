// src/strategies/traits.rs
use crate::error::IndicatorError;
use crate::types::{Bar, Trend};

/// A trend evaluator. Implementations keep rolling state keyed by bar
/// timestamp: bars arrive oldest first, and a repeated timestamp is the same
/// unfinished bar again, replacing what was derived from it.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    // Fewest bars get_trend needs before it can say anything
    fn min_period(&self) -> usize;

    // `window` is every bar seen so far, newest last
    fn get_trend(&mut self, window: &[Bar]) -> Result<Option<Trend>, IndicatorError>;
}
