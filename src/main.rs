// src/main.rs
use algotrail::config::AppConfig;
use algotrail::connectors::ReplayFeed;
use algotrail::core::{Backtester, EventBus, Optimizer, OptimizerGrid, SimulationTrader};
use algotrail::strategies;
use algotrail::types::{Bar, EngineEvent};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "algotrail", version, about = "Backtest and paper-trade crypto strategies")]
struct Cli {
    /// Settings file, extension optional (Settings.toml, Settings.json, ...)
    #[arg(long, global = true, default_value = "Settings")]
    settings: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one backtest over a bar history
    Backtest {
        /// JSON array of bars
        #[arg(long)]
        data: PathBuf,
        /// Write results here (.json for machine-readable output)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include the trade listing
        #[arg(long)]
        trades: bool,
    },
    /// Paper-trade by replaying a bar history
    Simulate {
        #[arg(long)]
        data: PathBuf,
        /// Bars visible before the first decision
        #[arg(long, default_value_t = 50)]
        warmup: usize,
    },
    /// Sweep settings over a parameter grid
    Optimize {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        grid: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "algotrail.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "algotrail=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bars from {}", path.display()))?;
    let bars: Vec<Bar> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse bars in {}", path.display()))?;
    info!(count = bars.len(), path = %path.display(), "Loaded bars");
    Ok(bars)
}

fn spawn_event_listener(mut receiver: mpsc::Receiver<EngineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                EngineEvent::Activity(activity) => debug!(
                    period = %activity.current_period,
                    net = %activity.net_string,
                    done = activity.percentage,
                    "Activity"
                ),
                EngineEvent::Trade(trade) => debug!("{}", trade),
                EngineEvent::Message(message) => warn!("{}", message),
            }
        }
    })
}

/// Ctrl+C clears `running`; the engine stops at its next check.
fn cancel_on_ctrl_c(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling");
            running.store(false, Ordering::SeqCst);
        }
    });
}

async fn backtest(config: AppConfig, data: PathBuf, output: Option<PathBuf>, trades: bool) -> Result<()> {
    let bars = load_bars(&data)?;
    let mut backtester = Backtester::new(bars, config.backtest_settings()?)?;

    let (tx, rx) = mpsc::channel(100);
    backtester.set_event_bus(EventBus::new(tx));
    let _listener = spawn_event_listener(rx);
    cancel_on_ctrl_c(backtester.running_flag());

    println!("{}", backtester.configuration_summary());
    let (backtester, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = backtester.run();
        (backtester, outcome)
    })
    .await
    .context("Backtest task panicked")?;

    let report = backtester.report();
    println!("\n{}", report);
    if trades {
        println!("\n{}", backtester.trades_listing());
    }

    if let Some(path) = output {
        let contents = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "trades": backtester.trader().trades(),
                "activity": backtester.past_activity(),
            }))?
        } else {
            let mut text = String::new();
            writeln!(text, "{}\n", backtester.configuration_summary())?;
            writeln!(text, "{}", report)?;
            if trades {
                writeln!(text, "\n{}", backtester.trades_listing())?;
            }
            text
        };
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        info!(path = %path.display(), "Results written");
    }

    match outcome {
        Err(e) if !e.is_cancelled() => Err(e.into()),
        _ => Ok(()),
    }
}

async fn simulate(config: AppConfig, data: PathBuf, warmup: usize) -> Result<()> {
    let bars = load_bars(&data)?;
    let strategies = strategies::build_all(&config.strategies)?;
    let feed = ReplayFeed::new(bars, warmup);

    let mut simulation = SimulationTrader::new(
        config.trader_settings()?,
        strategies,
        feed,
        Duration::from_millis(config.poll_interval_ms),
    );
    let (tx, rx) = mpsc::channel(100);
    simulation.set_event_bus(EventBus::new(tx));
    let _listener = spawn_event_listener(rx);

    let handle = simulation.start();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received, stopping simulation");
                handle.stop();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if handle.is_finished() {
                    break;
                }
            }
        }
    }

    // Ждём завершения цикла, чтобы снимок был финальным
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let snapshot = handle.snapshot().await;
    println!("Simulation results:");
    println!("\tNet: {}", snapshot.net_string);
    println!("\tBalance: {}", snapshot.balance);
    println!("\tCommissions paid: {}", snapshot.commissions_paid);
    println!("\tTrades made: {}", snapshot.trades_made);
    for trade in handle.trades().await {
        println!("\t{}", trade);
    }
    handle.join().await?;
    Ok(())
}

async fn optimize(config: AppConfig, data: PathBuf, grid: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let bars = load_bars(&data)?;
    let raw = std::fs::read_to_string(&grid)
        .with_context(|| format!("Failed to read grid from {}", grid.display()))?;
    let grid: OptimizerGrid = serde_json::from_str(&raw).context("Failed to parse optimizer grid")?;

    let backtester = Backtester::new(bars, config.backtest_settings()?)?;
    cancel_on_ctrl_c(backtester.running_flag());
    let mut optimizer = Optimizer::new(backtester);

    let (tx, rx) = mpsc::channel(100);
    optimizer.set_event_bus(EventBus::new(tx));
    let _listener = spawn_event_listener(rx);

    let (optimizer, result) = tokio::task::spawn_blocking(move || {
        let result = optimizer.optimize(&grid).map(|rows| rows.len());
        (optimizer, result)
    })
    .await
    .context("Optimizer task panicked")?;
    let runs = result?;

    let mut rows = optimizer.rows().to_vec();
    rows.sort_by(|a, b| b.profit_percentage.total_cmp(&a.profit_percentage));
    println!("Optimizer results ({} runs):", runs);
    for row in &rows {
        println!(
            "\t{:>6} {:>10}% {:<13} SL {} {} TP {} {} trades [{}] {}",
            row.run,
            row.profit_percentage,
            row.result.to_string(),
            row.stop_loss_strategy,
            row.stop_loss_percentage,
            row.take_profit_percentage,
            row.trades,
            row.strategy_interval,
            row.strategies
        );
    }

    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_string_pretty(&rows)?)
            .with_context(|| format!("Failed to write optimizer rows to {}", path.display()))?;
        info!(path = %path.display(), "Optimizer rows written");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let _guard = init_logging();

    let config = AppConfig::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings))?;
    config.validate()?;

    println!("========================================");
    println!("        ALGOTRAIL v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");

    match cli.command {
        Command::Backtest {
            data,
            output,
            trades,
        } => backtest(config, data, output, trades).await,
        Command::Simulate { data, warmup } => simulate(config, data, warmup).await,
        Command::Optimize { data, grid, output } => optimize(config, data, grid, output).await,
    }
}
