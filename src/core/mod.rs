// src/core/mod.rs
pub mod backtester;
pub mod events;
pub mod optimizer;
pub mod simulation;
pub mod trader;

pub use backtester::{BacktestReport, BacktestSettings, Backtester, Outcome};
pub use events::EventBus;
pub use optimizer::{Optimizer, OptimizerGrid, OptimizerRow};
pub use simulation::{SimulationHandle, SimulationTrader};
pub use trader::{LossSettings, Trader, TraderSettings};
