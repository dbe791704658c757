// src/core/backtester.rs
use crate::config::StrategyConfig;
use crate::core::events::EventBus;
use crate::core::trader::{profit_or_loss_label, Trader, TraderSettings};
use crate::error::{ConfigError, EngineError, Result};
use crate::strategies::{self, Strategy};
use crate::types::{ActivitySnapshot, Bar, EngineEvent, Position, Trend};
use crate::utils::intervals::Interval;
use crate::utils::precision::{format_rounded, round_to};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Net worth below this ends the run.
pub const OUT_OF_MONEY_THRESHOLD: f64 = 10.0;

/// Number of activity snapshots a run aims for.
const ACTIVITY_POINTS: usize = 100;

#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub trader: TraderSettings,
    pub strategies: Vec<StrategyConfig>,
    /// Defaults to the data interval.
    pub strategy_interval: Option<Interval>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// 0..=100, 100 disables the drawdown stop.
    pub drawdown_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "OUT OF MONEY")]
    OutOfMoney,
    #[serde(rename = "DRAWDOWN")]
    Drawdown,
    #[serde(rename = "CRASHED")]
    Crashed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "PASSED",
            Outcome::Hold => "HOLD",
            Outcome::OutOfMoney => "OUT OF MONEY",
            Outcome::Drawdown => "DRAWDOWN",
            Outcome::Crashed => "CRASHED",
        };
        f.write_str(s)
    }
}

/// Merges consecutive bars into one bar of the coarser interval.
pub fn aggregate(bars: &[Bar]) -> Option<Bar> {
    let first = bars.first()?;
    let last = bars.last()?;
    Some(Bar {
        timestamp: first.timestamp,
        open: first.open,
        high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        close: last.close,
        volume: bars.iter().map(|b| b.volume).sum(),
    })
}

/// Summary of a finished (or stopped) run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub run_id: Uuid,
    pub symbol: Option<String>,
    pub outcome: Option<Outcome>,
    pub elapsed_seconds: f64,
    pub start_period: DateTime<Utc>,
    pub end_period: DateTime<Utc>,
    pub starting_balance: f64,
    pub net: f64,
    pub commissions_paid: f64,
    pub trades_made: usize,
    /// `net - starting_balance`, rounded.
    pub profit: f64,
    /// Signed, two decimals.
    pub profit_percentage: f64,
    #[serde(skip)]
    precision: u32,
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.precision;
        writeln!(f, "Backtest results:")?;
        writeln!(
            f,
            "\tSymbol: {}",
            self.symbol.as_deref().unwrap_or("Unknown/Imported Data")
        )?;
        if let Some(outcome) = self.outcome {
            writeln!(f, "\tResult: {}", outcome)?;
        }
        writeln!(f, "\tElapsed: {} seconds", format_rounded(self.elapsed_seconds, 2))?;
        writeln!(f, "\tStart Period: {}", self.start_period)?;
        writeln!(f, "\tEnd Period: {}", self.end_period)?;
        writeln!(f, "\tStarting balance: ${}", format_rounded(self.starting_balance, p))?;
        writeln!(f, "\tNet: ${}", format_rounded(self.net, p))?;
        writeln!(f, "\tCommissions paid: ${}", format_rounded(self.commissions_paid, p))?;
        writeln!(f, "\tTrades made: {}", self.trades_made)?;

        let label = profit_or_loss_label(self.profit);
        if self.profit == 0.0 {
            write!(f, "\tNo profit or loss incurred.")
        } else {
            writeln!(f, "\t{}: ${}", label, format_rounded(self.profit.abs(), p))?;
            write!(
                f,
                "\t{} Percentage: {}%",
                label,
                format_rounded(self.profit_percentage.abs(), 2)
            )
        }
    }
}

/// Replays a bar history through the strategies and the [`Trader`].
pub struct Backtester {
    trader: Trader,
    data: Vec<Bar>,
    interval: Interval,
    strategy_interval: Interval,
    gap_multiplier: usize,

    strategy_configs: Vec<StrategyConfig>,
    strategies: Vec<Box<dyn Strategy>>,
    min_period: usize,
    trend: Option<Trend>,

    start_index: usize,
    end_index: usize,
    drawdown: f64,

    past_activity: Vec<ActivitySnapshot>,
    events: EventBus,
    running: Arc<AtomicBool>,
    run_id: Uuid,
    elapsed: Option<std::time::Duration>,
    outcome: Option<Outcome>,
}

impl Backtester {
    pub fn new(mut data: Vec<Bar>, settings: BacktestSettings) -> std::result::Result<Self, ConfigError> {
        let (first, last) = match (data.first(), data.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(ConfigError::EmptyData),
        };
        if first > last {
            debug!("Data is in descending order, reversing");
            data.reverse();
        }

        let interval = match data.get(1) {
            Some(second) => Interval::between(data[0].timestamp, second.timestamp)?,
            None => match settings.strategy_interval {
                Some(interval) => interval,
                None => Interval::from_minutes(1)?,
            },
        };
        let strategy_interval = settings.strategy_interval.unwrap_or(interval);
        let gap_multiplier = gap_multiplier(interval, strategy_interval)?;

        let strategies = strategies::build_all(&settings.strategies)?;
        let min_period = strategies::min_period(&strategies);

        let start_index = match settings.start_date {
            Some(date) => find_date_index(&data, date, true)?,
            None => 0,
        };
        let end_index = match settings.end_date {
            Some(date) => {
                let index = find_date_index(&data, date, false)?;
                if index < 1 {
                    return Err(ConfigError::NotEnoughPeriods);
                }
                if index <= start_index {
                    return Err(ConfigError::EndBeforeStart);
                }
                index
            }
            None => data.len() - 1,
        };

        info!(
            bars = data.len(),
            %interval,
            %strategy_interval,
            start_index,
            end_index,
            "Backtester ready"
        );

        Ok(Self {
            trader: Trader::new(settings.trader),
            data,
            interval,
            strategy_interval,
            gap_multiplier,
            strategy_configs: settings.strategies,
            strategies,
            min_period,
            trend: None,
            start_index,
            end_index,
            drawdown: settings.drawdown_percentage / 100.0,
            past_activity: Vec::new(),
            events: EventBus::disconnected(),
            running: Arc::new(AtomicBool::new(true)),
            run_id: Uuid::new_v4(),
            elapsed: None,
            outcome: None,
        })
    }

    pub fn set_event_bus(&mut self, events: EventBus) {
        self.trader.set_event_bus(events.clone());
        self.events = events;
    }

    /// Clearing the flag stops the run at the next bar.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn trader(&self) -> &Trader {
        &self.trader
    }

    pub fn trader_mut(&mut self) -> &mut Trader {
        &mut self.trader
    }

    pub fn data(&self) -> &[Bar] {
        &self.data
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn strategy_interval(&self) -> Interval {
        self.strategy_interval
    }

    pub fn gap_multiplier(&self) -> usize {
        self.gap_multiplier
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn end_index(&self) -> usize {
        self.end_index
    }

    pub fn min_period(&self) -> usize {
        self.min_period
    }

    pub fn strategy_configs(&self) -> &[StrategyConfig] {
        &self.strategy_configs
    }

    pub fn past_activity(&self) -> &[ActivitySnapshot] {
        &self.past_activity
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn change_strategy_interval(&mut self, interval: Interval) -> std::result::Result<(), ConfigError> {
        self.gap_multiplier = gap_multiplier(self.interval, interval)?;
        self.strategy_interval = interval;
        Ok(())
    }

    pub fn set_strategies(&mut self, configs: &[StrategyConfig]) -> std::result::Result<(), ConfigError> {
        self.strategies = strategies::build_all(configs)?;
        self.min_period = strategies::min_period(&self.strategies);
        self.strategy_configs = configs.to_vec();
        Ok(())
    }

    /// Resets the account and rebuilds the strategies so the next run starts
    /// from scratch.
    pub fn restore(&mut self) -> std::result::Result<(), ConfigError> {
        self.trader.restore();
        self.strategies = strategies::build_all(&self.strategy_configs)?;
        self.trend = None;
        self.past_activity.clear();
        self.run_id = Uuid::new_v4();
        self.elapsed = None;
        self.outcome = None;
        Ok(())
    }

    pub fn run(&mut self) -> Result<Outcome> {
        let test_length = self.end_index - self.start_index;
        let divisor = (test_length / ACTIVITY_POINTS).max(1);

        info!(run_id = %self.run_id, test_length, "Starting backtest");
        let started = Instant::now();
        let result = if self.strategies.is_empty() {
            self.simulate_hold(test_length, divisor)
        } else {
            self.strategy_backtest(test_length, divisor)
        };
        self.elapsed = Some(started.elapsed());

        match &result {
            Ok(outcome) => {
                self.outcome = Some(*outcome);
                info!(
                    %outcome,
                    net = round_to(self.trader.get_net(), self.trader.precision()),
                    trades = self.trader.trades().len(),
                    "Backtest finished"
                );
            }
            Err(e) if e.is_cancelled() => warn!("{}", e),
            Err(e) => error!(error = %e, "Backtest failed"),
        }
        result
    }

    fn check_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Cancelled("Backtest"))
        }
    }

    fn set_indexed_period(&mut self, index: usize) {
        let bar = &self.data[index];
        self.trader.set_period(bar.open, bar.timestamp);
    }

    fn simulate_hold(&mut self, test_length: usize, divisor: usize) -> Result<Outcome> {
        for index in (self.start_index..self.end_index).step_by(divisor) {
            self.check_running()?;
            self.set_indexed_period(index);
            if self.trader.position() != Some(Position::Long) {
                self.trader.enter_long("Entered long to simulate a hold.", false)?;
            }
            self.record_activity(index, test_length);
        }
        self.exit_backtest(self.end_index)?;
        Ok(Outcome::Hold)
    }

    fn strategy_backtest(&mut self, test_length: usize, divisor: usize) -> Result<Outcome> {
        let same_interval = self.interval == self.strategy_interval;
        let step = self.strategy_interval.duration();
        let mut strategy_data: Vec<Bar> = Vec::new();
        let mut next_insertion = self.data[self.start_index].timestamp + step;
        let mut period_start = self.start_index;

        for index in self.start_index..=self.end_index {
            self.check_running()?;
            self.set_indexed_period(index);
            self.trader.main_logic(self.trend)?;

            let net = self.trader.get_net();
            if net < OUT_OF_MONEY_THRESHOLD {
                let message = "Backtester ran out of money. Change your strategy or date interval.";
                warn!(net, "{}", message);
                self.events.send(EngineEvent::Message(message.to_string()));
                self.exit_backtest(index)?;
                return Ok(Outcome::OutOfMoney);
            }
            if net < (1.0 - self.drawdown) * self.trader.starting_balance() {
                warn!(net, drawdown = self.drawdown * 100.0, "Drawdown limit reached");
                self.exit_backtest(index)?;
                return Ok(Outcome::Drawdown);
            }

            if same_interval {
                if index + 1 >= self.min_period {
                    self.trend = strategies::evaluate(&mut self.strategies, &self.data[..=index])?;
                }
            } else {
                if self.data[index].timestamp >= next_insertion {
                    next_insertion = self.data[index].timestamp + step;
                    let group = &self.data[period_start..index];
                    if group.len() != self.gap_multiplier {
                        warn!(
                            expected = self.gap_multiplier,
                            got = group.len(),
                            "Aggregated bar built from an unexpected number of bars"
                        );
                    }
                    if let Some(merged) = aggregate(group) {
                        strategy_data.push(merged);
                    }
                    period_start = index;
                }

                if strategy_data.len() + 1 >= self.min_period {
                    // The unfinished period, stamped with its start so the
                    // strategies overwrite it until it is committed.
                    if let Some(running) = aggregate(&self.data[period_start..=index]) {
                        strategy_data.push(running);
                        let trend = strategies::evaluate(&mut self.strategies, &strategy_data);
                        strategy_data.pop();
                        self.trend = trend?;
                    }
                }
            }

            if index % divisor == 0 {
                self.record_activity(index, test_length);
            }
        }

        self.exit_backtest(self.end_index)?;
        Ok(Outcome::Passed)
    }

    /// Closes any open position at the close of bar `index`.
    fn exit_backtest(&mut self, index: usize) -> Result<()> {
        let bar = &self.data[index];
        self.trader.set_period(bar.close, bar.timestamp);
        match self.trader.position() {
            Some(Position::Short) => {
                self.trader
                    .exit_short("Exited short position because backtest ended.", false)?;
            }
            Some(Position::Long) => {
                self.trader
                    .exit_long("Exited long position because backtest ended.", false)?;
            }
            None => {}
        }
        Ok(())
    }

    fn record_activity(&mut self, index: usize, test_length: usize) {
        let percentage = if test_length == 0 {
            100
        } else {
            ((index - self.start_index) * 100 / test_length).min(100) as u8
        };
        let snapshot = self.trader.activity(percentage);
        self.events.send(EngineEvent::Activity(snapshot.clone()));
        self.past_activity.push(snapshot);
    }

    pub fn report(&self) -> BacktestReport {
        let start = self.trader.starting_balance();
        let net = self.trader.get_net();
        let precision = self.trader.precision();
        let end_period = self
            .trader
            .current_time()
            .unwrap_or(self.data[self.end_index].timestamp);

        BacktestReport {
            run_id: self.run_id,
            symbol: self.trader.symbol().map(str::to_string),
            outcome: self.outcome,
            elapsed_seconds: self.elapsed.map_or(0.0, |d| d.as_secs_f64()),
            start_period: self.data[self.start_index].timestamp,
            end_period,
            starting_balance: start,
            net: round_to(net, precision),
            commissions_paid: round_to(self.trader.commissions_paid(), precision),
            trades_made: self.trader.trades().len(),
            profit: round_to(net - start, precision),
            profit_percentage: round_to(self.trader.profit_percentage(), 2),
            precision,
        }
    }

    pub fn strategies_summary(&self) -> String {
        if self.strategy_configs.is_empty() {
            return "Strategies: none, simulating a hold.".to_string();
        }
        let mut out = String::from("Strategies:");
        for config in &self.strategy_configs {
            out.push_str(&format!("\n\t{}", config));
        }
        out
    }

    pub fn configuration_summary(&self) -> String {
        let settings = self.trader.settings();
        let mut lines = vec![
            "Backtest configuration:".to_string(),
            format!("\tInterval: {}", self.interval),
            format!("\tStrategy Interval: {}", self.strategy_interval),
            format!("\tDrawdown Percentage: {}", self.drawdown * 100.0),
            format!("\tMargin Enabled: {}", settings.margin_enabled),
            format!("\tStarting Balance: ${}", settings.starting_balance),
        ];

        if let Some(take_profit) = settings.take_profit {
            lines.push(format!(
                "\tTake Profit Percentage: {}%",
                format_rounded(take_profit * 100.0, 2)
            ));
        }
        if let Some(loss) = &settings.loss {
            lines.push(format!("\tStop Loss Strategy: {}", loss.strategy));
            lines.push(format!(
                "\tStop Loss Percentage: {}%",
                format_rounded(loss.percentage * 100.0, 2)
            ));
            lines.push(format!("\tSmart Stop Loss Counter: {}", loss.smart_stop_loss_counter));
        }
        lines.push(self.strategies_summary());
        lines.join("\n")
    }

    pub fn trades_listing(&self) -> String {
        let mut out = String::from("Trades made:");
        for trade in self.trader.trades() {
            out.push_str(&format!("\n\t{}", trade));
        }
        out
    }
}

fn gap_multiplier(data: Interval, strategy: Interval) -> std::result::Result<usize, ConfigError> {
    if data.minutes() > strategy.minutes() {
        return Err(ConfigError::StrategyIntervalTooSmall {
            strategy: strategy.minutes(),
            data: data.minutes(),
        });
    }
    Ok((strategy.minutes() / data.minutes()) as usize)
}

/// First (or last, when `starting` is false) bar on `date`.
fn find_date_index(
    data: &[Bar],
    date: NaiveDate,
    starting: bool,
) -> std::result::Result<usize, ConfigError> {
    let on_date = |bar: &Bar| bar.timestamp.date_naive() == date;
    let found = if starting {
        data.iter().position(on_date)
    } else {
        data.iter().rposition(on_date)
    };
    found.ok_or(ConfigError::DateNotFound(date))
}
