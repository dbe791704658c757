// src/connectors/replay.rs
use crate::connectors::traits::PriceFeed;
use crate::types::Bar;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

/// Plays a stored bar history back one bar per refresh. Used for paper
/// trading against old data.
pub struct ReplayFeed {
    bars: Vec<Bar>,
    cursor: usize,
}

impl ReplayFeed {
    /// `warmup` bars are visible right away so strategies have a history.
    pub fn new(mut bars: Vec<Bar>, warmup: usize) -> Self {
        if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
            if first.timestamp > last.timestamp {
                bars.reverse();
            }
        }
        let cursor = warmup.max(1).min(bars.len());
        Self { bars, cursor }
    }

    pub fn remaining(&self) -> usize {
        self.bars.len() - self.cursor
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn current_price(&mut self) -> Result<f64> {
        self.bars()
            .last()
            .map(|bar| bar.close)
            .ok_or_else(|| anyhow!("Replay feed has no bars"))
    }

    fn needs_refresh(&self) -> bool {
        self.cursor < self.bars.len()
    }

    async fn refresh(&mut self) -> Result<()> {
        if self.cursor < self.bars.len() {
            self.cursor += 1;
            debug!(cursor = self.cursor, total = self.bars.len(), "Replay advanced");
        }
        Ok(())
    }

    fn bars(&self) -> &[Bar] {
        &self.bars[..self.cursor]
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.bars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(count: i64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| Bar::flat(start + Duration::minutes(i), 10.0 + i as f64))
            .collect()
    }

    #[tokio::test]
    async fn replays_one_bar_per_refresh() {
        let mut feed = ReplayFeed::new(bars(5), 3);
        assert_eq!(feed.bars().len(), 3);
        assert_eq!(feed.current_price().await.unwrap(), 12.0);

        assert!(feed.needs_refresh());
        feed.refresh().await.unwrap();
        assert_eq!(feed.bars().len(), 4);
        feed.refresh().await.unwrap();
        assert!(feed.is_finished());
        assert!(!feed.needs_refresh());
        assert_eq!(feed.current_price().await.unwrap(), 14.0);

        feed.refresh().await.unwrap();
        assert_eq!(feed.bars().len(), 5);
    }

    #[tokio::test]
    async fn empty_replay_has_no_price() {
        let mut feed = ReplayFeed::new(Vec::new(), 10);
        assert!(feed.is_finished());
        assert!(feed.current_price().await.is_err());
    }

    #[test]
    fn descending_input_is_reversed() {
        let mut data = bars(4);
        data.reverse();
        let feed = ReplayFeed::new(data, 4);
        assert!(feed.bars()[0].timestamp < feed.bars()[3].timestamp);
        assert_eq!(feed.remaining(), 0);
    }
}
