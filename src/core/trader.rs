// src/core/trader.rs
use crate::core::events::EventBus;
use crate::error::{EngineError, Result};
use crate::types::{ActivitySnapshot, EngineEvent, LossStrategy, Position, TradeRecord, Trend};
use crate::utils::precision::{format_money, format_optional_money, format_rounded, round_to};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

pub const DEFAULT_TRANSACTION_FEE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub struct LossSettings {
    pub strategy: LossStrategy,
    /// Decimal, 0.05 = 5%.
    pub percentage: f64,
    pub smart_stop_loss_counter: u32,
    pub safety_timer: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraderSettings {
    pub symbol: Option<String>,
    pub starting_balance: f64,
    pub precision: u32,
    pub margin_enabled: bool,
    /// Decimal fee charged on every fill.
    pub transaction_fee: f64,
    pub loss: Option<LossSettings>,
    /// Decimal take-profit distance from the entry price.
    pub take_profit: Option<f64>,
}

impl Default for TraderSettings {
    fn default() -> Self {
        Self {
            symbol: None,
            starting_balance: 1000.0,
            precision: 2,
            margin_enabled: false,
            transaction_fee: DEFAULT_TRANSACTION_FEE,
            loss: None,
            take_profit: None,
        }
    }
}

/// Signed percentage change from `initial` to `final_net`.
pub fn profit_percentage(initial: f64, final_net: f64) -> f64 {
    if final_net >= initial {
        final_net / initial * 100.0 - 100.0
    } else {
        -(100.0 - final_net / initial * 100.0)
    }
}

pub fn profit_or_loss_label(profit: f64) -> &'static str {
    if profit >= 0.0 {
        "Profit"
    } else {
        "Loss"
    }
}

/// Account plus position state machine shared by the backtest and the
/// simulation drivers. Every mutator needs a current price; call
/// [`Trader::set_period`] first.
pub struct Trader {
    settings: TraderSettings,

    balance: f64,
    coin: f64,
    coin_owed: f64,
    commissions_paid: f64,
    trades: Vec<TradeRecord>,

    current_price: Option<f64>,
    current_time: Option<DateTime<Utc>>,
    position: Option<Position>,
    previous_position: Option<Position>,

    long_entry_price: Option<f64>,
    long_trailing_price: Option<f64>,
    short_entry_price: Option<f64>,
    short_trailing_price: Option<f64>,

    smart_stop_loss_counter: u32,
    smart_stop_loss_enter: bool,
    stop_loss_exit: bool,
    stop_loss: Option<f64>,
    previous_stop_loss: Option<f64>,
    take_profit_point: Option<f64>,
    custom_stop_loss: Option<f64>,
    safety_deadline: Option<DateTime<Utc>>,

    events: EventBus,
}

impl Trader {
    pub fn new(settings: TraderSettings) -> Self {
        let counter = settings
            .loss
            .as_ref()
            .map_or(0, |loss| loss.smart_stop_loss_counter);
        Self {
            balance: settings.starting_balance,
            coin: 0.0,
            coin_owed: 0.0,
            commissions_paid: 0.0,
            trades: Vec::new(),
            current_price: None,
            current_time: None,
            position: None,
            previous_position: None,
            long_entry_price: None,
            long_trailing_price: None,
            short_entry_price: None,
            short_trailing_price: None,
            smart_stop_loss_counter: counter,
            smart_stop_loss_enter: false,
            stop_loss_exit: false,
            stop_loss: None,
            previous_stop_loss: None,
            take_profit_point: None,
            custom_stop_loss: None,
            safety_deadline: None,
            events: EventBus::disconnected(),
            settings,
        }
    }

    pub fn set_event_bus(&mut self, events: EventBus) {
        self.events = events;
    }

    pub fn set_period(&mut self, price: f64, timestamp: DateTime<Utc>) {
        self.current_price = Some(price);
        self.current_time = Some(timestamp);
    }

    pub fn settings(&self) -> &TraderSettings {
        &self.settings
    }

    pub fn symbol(&self) -> Option<&str> {
        self.settings.symbol.as_deref()
    }

    pub fn starting_balance(&self) -> f64 {
        self.settings.starting_balance
    }

    pub fn precision(&self) -> u32 {
        self.settings.precision
    }

    pub fn margin_enabled(&self) -> bool {
        self.settings.margin_enabled
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn coin(&self) -> f64 {
        self.coin
    }

    pub fn coin_owed(&self) -> f64 {
        self.coin_owed
    }

    pub fn commissions_paid(&self) -> f64 {
        self.commissions_paid
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn previous_position(&self) -> Option<Position> {
        self.previous_position
    }

    pub fn current_price(&self) -> Option<f64> {
        self.current_price
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current_time
    }

    pub fn smart_stop_loss_counter(&self) -> u32 {
        self.smart_stop_loss_counter
    }

    pub fn stop_loss_exit(&self) -> bool {
        self.stop_loss_exit
    }

    pub fn previous_stop_loss(&self) -> Option<f64> {
        self.previous_stop_loss
    }

    pub fn long_trailing_price(&self) -> Option<f64> {
        self.long_trailing_price
    }

    pub fn short_trailing_price(&self) -> Option<f64> {
        self.short_trailing_price
    }

    pub fn custom_stop_loss(&self) -> Option<f64> {
        self.custom_stop_loss
    }

    /// Absolute exit level checked before the regular stop loss. Cleared on
    /// every exit.
    pub fn set_custom_stop_loss(&mut self, level: Option<f64>) {
        self.custom_stop_loss = level;
    }

    pub fn apply_loss_settings(&mut self, loss: Option<LossSettings>) {
        self.smart_stop_loss_counter = loss.as_ref().map_or(0, |l| l.smart_stop_loss_counter);
        self.settings.loss = loss;
    }

    pub fn apply_take_profit(&mut self, take_profit: Option<f64>) {
        self.settings.take_profit = take_profit;
    }

    pub fn stop_loss_strategy_string(&self) -> String {
        match &self.settings.loss {
            Some(loss) => loss.strategy.to_string(),
            None => "None".to_string(),
        }
    }

    pub fn get_net(&self) -> f64 {
        let price = self.current_price.unwrap_or(0.0);
        self.coin * price - self.coin_owed * price + self.balance
    }

    pub fn profit_percentage(&self) -> f64 {
        profit_percentage(self.settings.starting_balance, self.get_net())
    }

    fn price(&self) -> Result<f64> {
        self.current_price.ok_or(EngineError::MissingPrice)
    }

    fn add_trade(&mut self, reason: &str, stop_loss_exit: bool, smart_enter: bool) {
        self.stop_loss_exit = stop_loss_exit;
        self.smart_stop_loss_enter = smart_enter;
        self.safety_deadline = None;

        let record = TradeRecord {
            timestamp: self.current_time.unwrap_or_else(Utc::now),
            action: reason.to_string(),
            net: round_to(self.get_net(), self.settings.precision),
        };
        info!(
            price = self.current_price,
            net = record.net,
            balance = self.balance,
            "{}",
            reason
        );
        self.events.send(EngineEvent::Trade(record.clone()));
        self.trades.push(record);
    }

    pub fn enter_long(&mut self, reason: &str, smart_enter: bool) -> Result<bool> {
        let price = self.price()?;
        if self.position.is_some() {
            debug!(position = ?self.position, "Enter long ignored, already in a position");
            return Ok(false);
        }
        if self.balance <= 0.0 {
            warn!(balance = self.balance, "Enter long ignored, no balance to invest");
            return Ok(false);
        }

        let usd = self.balance;
        let fee = usd * self.settings.transaction_fee;
        self.commissions_paid += fee;
        self.position = Some(Position::Long);
        self.coin += (usd - fee) / price;
        self.balance -= usd;
        self.long_entry_price = Some(price);
        self.long_trailing_price = Some(price);
        self.add_trade(reason, false, smart_enter);
        Ok(true)
    }

    pub fn exit_long(&mut self, reason: &str, stop_loss_exit: bool) -> Result<bool> {
        let price = self.price()?;
        if self.position != Some(Position::Long) {
            debug!(position = ?self.position, "Exit long ignored, not long");
            return Ok(false);
        }

        let coin = self.coin;
        let fee = price * coin * self.settings.transaction_fee;
        self.commissions_paid += fee;
        self.position = None;
        self.previous_position = Some(Position::Long);
        self.coin -= coin;
        self.balance += coin * price - fee;
        self.long_entry_price = None;
        self.long_trailing_price = None;
        self.custom_stop_loss = None;
        self.add_trade(reason, stop_loss_exit, false);
        Ok(true)
    }

    pub fn enter_short(&mut self, reason: &str, smart_enter: bool) -> Result<bool> {
        let price = self.price()?;
        if self.position.is_some() {
            debug!(position = ?self.position, "Enter short ignored, already in a position");
            return Ok(false);
        }
        if self.balance <= 0.0 {
            warn!(balance = self.balance, "Enter short ignored, no balance to borrow against");
            return Ok(false);
        }

        let fee = self.balance * self.settings.transaction_fee;
        let coin = self.balance / price;
        self.commissions_paid += fee;
        self.position = Some(Position::Short);
        self.coin_owed += coin;
        self.balance += price * coin - fee;
        self.short_entry_price = Some(price);
        self.short_trailing_price = Some(price);
        self.add_trade(reason, false, smart_enter);
        Ok(true)
    }

    pub fn exit_short(&mut self, reason: &str, stop_loss_exit: bool) -> Result<bool> {
        let price = self.price()?;
        if self.position != Some(Position::Short) {
            debug!(position = ?self.position, "Exit short ignored, not short");
            return Ok(false);
        }

        let coin = self.coin_owed;
        let fee = coin * price * self.settings.transaction_fee;
        self.commissions_paid += fee;
        self.position = None;
        self.previous_position = Some(Position::Short);
        self.coin_owed -= coin;
        self.balance -= price * coin + fee;
        self.short_entry_price = None;
        self.short_trailing_price = None;
        self.custom_stop_loss = None;
        self.add_trade(reason, stop_loss_exit, false);
        Ok(true)
    }

    /// Leaves whatever position is open. Not treated as a stop-loss exit.
    pub fn force_exit(&mut self, reason: &str) -> Result<bool> {
        match self.position {
            Some(Position::Long) => self.exit_long(reason, false),
            Some(Position::Short) => self.exit_short(reason, false),
            None => Ok(false),
        }
    }

    fn reset_smart_stop_loss(&mut self) {
        self.smart_stop_loss_counter = self
            .settings
            .loss
            .as_ref()
            .map_or(0, |loss| loss.smart_stop_loss_counter);
    }

    fn handle_trailing_prices(&mut self, price: f64) {
        if let Some(trailing) = self.long_trailing_price {
            if price > trailing {
                self.long_trailing_price = Some(price);
            }
        }
        if let Some(trailing) = self.short_trailing_price {
            if price < trailing {
                self.short_trailing_price = Some(price);
            }
        }
    }

    /// Stop-loss level for the open position, if a loss strategy is set.
    /// Moves the trailing anchors first. A position opened by a smart
    /// re-entry keeps the previous level while it is still on the safe side.
    pub fn get_stop_loss(&mut self) -> Option<f64> {
        let (strategy, pct) = self
            .settings
            .loss
            .as_ref()
            .map(|loss| (loss.strategy, loss.percentage))?;
        let price = self.current_price?;
        let position = self.position?;

        self.handle_trailing_prices(price);

        let sticky = self.previous_stop_loss.filter(|_| self.smart_stop_loss_enter);
        let level = match position {
            Position::Short => match sticky {
                Some(previous) if previous > price => Some(previous),
                _ => match strategy {
                    LossStrategy::Trailing => self.short_trailing_price.map(|p| p * (1.0 + pct)),
                    LossStrategy::Stop => self.short_entry_price.map(|p| p * (1.0 + pct)),
                },
            },
            Position::Long => match sticky {
                Some(previous) if previous < price => Some(previous),
                _ => match strategy {
                    LossStrategy::Trailing => self.long_trailing_price.map(|p| p * (1.0 - pct)),
                    LossStrategy::Stop => self.long_entry_price.map(|p| p * (1.0 - pct)),
                },
            },
        };

        if level.is_some() {
            self.stop_loss = level;
            self.previous_stop_loss = level;
        }
        level
    }

    pub fn get_take_profit(&mut self) -> Option<f64> {
        let pct = self.settings.take_profit?;
        self.take_profit_point = match self.position {
            Some(Position::Short) => self.short_entry_price.map(|p| p * (1.0 - pct)),
            Some(Position::Long) => self.long_entry_price.map(|p| p * (1.0 + pct)),
            None => None,
        };
        self.take_profit_point
    }

    /// `None` while the safety timer is still running, otherwise whether the
    /// exit went through the timer.
    fn stop_loss_due(&mut self) -> Option<bool> {
        let Some(timer) = self.settings.loss.as_ref().and_then(|l| l.safety_timer) else {
            return Some(false);
        };
        let now = self.current_time.unwrap_or_else(Utc::now);
        match self.safety_deadline {
            None => {
                let deadline = now + timer;
                info!(%deadline, "Stop loss reached, waiting for safety timer");
                self.safety_deadline = Some(deadline);
                None
            }
            Some(deadline) if now > deadline => Some(true),
            Some(_) => None,
        }
    }

    /// One decision step for the current price and the strategies' trend.
    pub fn main_logic(&mut self, trend: Option<Trend>) -> Result<()> {
        let price = self.price()?;
        match self.position {
            Some(Position::Short) => self.short_logic(price, trend),
            Some(Position::Long) => self.long_logic(price, trend),
            None => self.flat_logic(price, trend),
        }
    }

    fn short_logic(&mut self, price: f64, trend: Option<Trend>) -> Result<()> {
        if let Some(level) = self.custom_stop_loss {
            if price >= level {
                self.exit_short("Exited short because of custom stop loss.", false)?;
                return Ok(());
            }
        }

        match self.get_stop_loss() {
            Some(stop) if price > stop => {
                match self.stop_loss_due() {
                    Some(false) => {
                        self.exit_short("Exited short because a stop loss was triggered.", true)?;
                    }
                    Some(true) => {
                        self.exit_short("Exited short because of stop loss and safety timer.", true)?;
                    }
                    None => {}
                }
                return Ok(());
            }
            _ => self.safety_deadline = None,
        }

        if let Some(target) = self.get_take_profit() {
            if price <= target {
                self.exit_short("Exited short because of take profit.", false)?;
                return Ok(());
            }
        }

        match trend {
            Some(Trend::Bullish) => {
                self.exit_short("Exited short because a bullish trend was detected.", false)?;
                self.enter_long("Entered long because a bullish trend was detected.", false)?;
            }
            Some(Trend::ExitShort) => {
                self.exit_short("Exited short because an exit-short trend was detected.", false)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn long_logic(&mut self, price: f64, trend: Option<Trend>) -> Result<()> {
        if let Some(level) = self.custom_stop_loss {
            if price <= level {
                self.exit_long("Exited long because of custom stop loss.", false)?;
                return Ok(());
            }
        }

        match self.get_stop_loss() {
            Some(stop) if price < stop => {
                match self.stop_loss_due() {
                    Some(false) => {
                        self.exit_long("Exited long because a stop loss was triggered.", true)?;
                    }
                    Some(true) => {
                        self.exit_long("Exited long because of stop loss and safety timer.", true)?;
                    }
                    None => {}
                }
                return Ok(());
            }
            _ => self.safety_deadline = None,
        }

        if let Some(target) = self.get_take_profit() {
            if price >= target {
                self.exit_long("Exited long because of take profit.", false)?;
                return Ok(());
            }
        }

        match trend {
            Some(Trend::Bearish) => {
                self.exit_long("Exited long because a bearish trend was detected.", false)?;
                if self.settings.margin_enabled {
                    self.enter_short("Entered short because a bearish trend was detected.", false)?;
                }
            }
            Some(Trend::ExitLong) => {
                self.exit_long("Exited long because an exit-long trend was detected.", false)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn flat_logic(&mut self, price: f64, trend: Option<Trend>) -> Result<()> {
        let margin = self.settings.margin_enabled;

        // Without margin a recovered price must not keep blocking new longs.
        if !margin && self.previous_stop_loss.is_some_and(|level| level < price) {
            self.stop_loss_exit = false;
        }

        if self.stop_loss_exit && self.smart_stop_loss_counter > 0 {
            match (self.previous_position, self.previous_stop_loss) {
                (Some(Position::Long), Some(level)) if price > level => {
                    self.enter_long("Reentered long because of smart stop loss.", true)?;
                    self.smart_stop_loss_counter -= 1;
                    return Ok(());
                }
                (Some(Position::Short), Some(level)) if price < level => {
                    self.enter_short("Reentered short because of smart stop loss.", true)?;
                    self.smart_stop_loss_counter -= 1;
                    return Ok(());
                }
                _ => {}
            }
        }

        // A bullish re-entry is only refused after a long stop loss; a bearish
        // one is refused after any short.
        let long_blocked = self.previous_position == Some(Position::Long) && self.stop_loss_exit;
        let short_blocked = self.previous_position == Some(Position::Short);

        match trend {
            Some(Trend::Bullish) if !long_blocked => {
                self.enter_long("Entered long because a bullish trend was detected.", false)?;
                self.reset_smart_stop_loss();
            }
            Some(Trend::Bearish) if margin && !short_blocked => {
                self.enter_short("Entered short because a bearish trend was detected.", false)?;
                self.reset_smart_stop_loss();
            }
            Some(Trend::EnterLong) => {
                self.enter_long("Entered long because an enter-long trend was detected.", false)?;
                self.reset_smart_stop_loss();
            }
            Some(Trend::EnterShort) if margin => {
                self.enter_short("Entered short because an enter-short trend was detected.", false)?;
                self.reset_smart_stop_loss();
            }
            _ => {}
        }
        Ok(())
    }

    /// Progress snapshot at the current period.
    pub fn activity(&self, percentage: u8) -> ActivitySnapshot {
        let precision = self.settings.precision;
        let start = self.settings.starting_balance;
        let net = self.get_net();
        let profit = net - start;
        let profit_pct = if profit < 0.0 {
            100.0 - net / start * 100.0
        } else {
            net / start * 100.0 - 100.0
        };
        let time = self.current_time.unwrap_or_else(Utc::now);

        ActivitySnapshot {
            price: format_optional_money(self.current_price, precision),
            net: round_to(net, precision),
            net_string: format_money(net, precision),
            balance: format_money(self.balance, precision),
            commissions_paid: format_money(self.commissions_paid, precision),
            trades_made: self.trades.len(),
            profit: format_money(profit.abs(), precision),
            profit_percentage: format!("{}%", format_rounded(profit_pct, 2)),
            current_period: time.format("%m/%d/%Y, %H:%M:%S").to_string(),
            utc: time.timestamp(),
            percentage,
        }
    }

    /// Back to the starting state: ledger cleared, balance restored, no
    /// position and no stop-loss memory.
    pub fn restore(&mut self) {
        self.trades.clear();
        self.reset_smart_stop_loss();
        self.balance = self.settings.starting_balance;
        self.coin = 0.0;
        self.coin_owed = 0.0;
        self.commissions_paid = 0.0;
        self.current_price = None;
        self.current_time = None;
        self.position = None;
        self.previous_position = None;
        self.long_entry_price = None;
        self.long_trailing_price = None;
        self.short_entry_price = None;
        self.short_trailing_price = None;
        self.stop_loss = None;
        self.previous_stop_loss = None;
        self.take_profit_point = None;
        self.custom_stop_loss = None;
        self.stop_loss_exit = false;
        self.smart_stop_loss_enter = false;
        self.safety_deadline = None;
    }
}
