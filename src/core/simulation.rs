// src/core/simulation.rs
use crate::connectors::traits::PriceFeed;
use crate::core::events::EventBus;
use crate::core::trader::{Trader, TraderSettings};
use crate::error::{EngineError, Result};
use crate::strategies::{self, Strategy};
use crate::types::{ActivitySnapshot, EngineEvent, TradeRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Paper-trading driver: polls a [`PriceFeed`] and runs the same decision
/// logic as the backtester once per new bar.
pub struct SimulationTrader<F> {
    trader: Arc<Mutex<Trader>>,
    feed: Arc<Mutex<F>>,
    strategies: Vec<Box<dyn Strategy>>,
    poll_interval: Duration,
    events: EventBus,
}

impl<F> SimulationTrader<F>
where
    F: PriceFeed + 'static,
{
    pub fn new(
        settings: TraderSettings,
        strategies: Vec<Box<dyn Strategy>>,
        feed: F,
        poll_interval: Duration,
    ) -> Self {
        Self {
            trader: Arc::new(Mutex::new(Trader::new(settings))),
            feed: Arc::new(Mutex::new(feed)),
            strategies,
            poll_interval,
            events: EventBus::disconnected(),
        }
    }

    pub fn set_event_bus(&mut self, events: EventBus) {
        self.events = events;
    }

    /// Spawns the polling loop on the runtime.
    pub fn start(self) -> SimulationHandle<F> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trader = Arc::clone(&self.trader);
        let feed = Arc::clone(&self.feed);
        let task = tokio::spawn(self.run(shutdown_rx));

        SimulationHandle {
            trader,
            feed,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.trader.lock().await.set_event_bus(self.events.clone());
        let min_period = strategies::min_period(&self.strategies);
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut last_bar: Option<DateTime<Utc>> = None;

        info!(poll_ms = self.poll_interval.as_millis() as u64, min_period, "Simulation started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Simulation stop requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.step(min_period, &mut last_bar).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("Price feed finished");
                    break;
                }
                Err(e @ EngineError::Feed(_)) => {
                    // Transient, try again on the next tick.
                    warn!(error = %e, "Price feed error");
                }
                Err(e) => {
                    error!(error = %e, "Simulation stopped");
                    return Err(e);
                }
            }
        }

        let trader = self.trader.lock().await;
        info!(
            net = trader.get_net(),
            trades = trader.trades().len(),
            "Simulation ended"
        );
        Ok(())
    }

    /// One poll. Returns false once a finite feed has been fully consumed.
    async fn step(&mut self, min_period: usize, last_bar: &mut Option<DateTime<Utc>>) -> Result<bool> {
        // Account lock first, then the feed. Held through the whole decision.
        let mut trader = self.trader.lock().await;
        let mut feed = self.feed.lock().await;

        if feed.needs_refresh() {
            feed.refresh().await?;
        }
        let newest = feed.bars().last().map(|bar| bar.timestamp);
        let price = feed.current_price().await?;
        trader.set_period(price, Utc::now());

        if newest.is_some() && newest != *last_bar {
            *last_bar = newest;
            let window = feed.bars();
            let trend = if window.len() >= min_period && !self.strategies.is_empty() {
                strategies::evaluate(&mut self.strategies, window)?
            } else {
                None
            };
            trader.main_logic(trend)?;
            self.events.send(EngineEvent::Activity(trader.activity(0)));
        }

        Ok(!feed.is_finished())
    }
}

/// Control side of a running simulation.
pub struct SimulationHandle<F> {
    trader: Arc<Mutex<Trader>>,
    feed: Arc<Mutex<F>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl<F> SimulationHandle<F>
where
    F: PriceFeed + 'static,
{
    pub fn stop(&self) {
        // Error only means the loop is already gone.
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| EngineError::Feed(anyhow::anyhow!("Simulation task failed: {}", e)))?
    }

    /// Manual override. Re-reads the price under the account lock so it
    /// cannot interleave with an automatic decision.
    pub async fn force_exit(&self, reason: &str) -> Result<bool> {
        let mut trader = self.trader.lock().await;
        let price = self.feed.lock().await.current_price().await?;
        trader.set_period(price, Utc::now());
        trader.force_exit(reason)
    }

    pub async fn set_custom_stop_loss(&self, level: Option<f64>) {
        self.trader.lock().await.set_custom_stop_loss(level);
    }

    pub async fn snapshot(&self) -> ActivitySnapshot {
        self.trader.lock().await.activity(0)
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.trader.lock().await.trades().to_vec()
    }

    pub async fn net(&self) -> f64 {
        self.trader.lock().await.get_net()
    }
}
