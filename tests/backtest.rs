use algotrail::config::StrategyConfig;
use algotrail::core::{
    BacktestSettings, Backtester, EventBus, LossSettings, Optimizer, OptimizerGrid, Outcome,
    TraderSettings,
};
use algotrail::indicators::AverageKind;
use algotrail::strategies::{self, Strategy};
use algotrail::strategies::moving_average::{MovingAverageOption, MovingAverageParams};
use algotrail::strategies::stoic::StoicParams;
use algotrail::types::{Bar, EngineEvent, LossStrategy, PriceField};
use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

fn bars(prices: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2021, 8, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| Bar::flat(start + Duration::minutes(i as i64), p))
        .collect()
}

fn rising(count: usize) -> Vec<f64> {
    (0..count).map(|i| 100.0 + i as f64).collect()
}

fn sma(short: usize, long: usize) -> MovingAverageOption {
    MovingAverageOption {
        average: AverageKind::Sma,
        price: PriceField::Close,
        short,
        long,
    }
}

fn crossover(options: Vec<MovingAverageOption>) -> StrategyConfig {
    StrategyConfig::MovingAverage(MovingAverageParams { options })
}

fn settings(strategies: Vec<StrategyConfig>, margin_enabled: bool) -> BacktestSettings {
    BacktestSettings {
        trader: TraderSettings {
            margin_enabled,
            ..TraderSettings::default()
        },
        strategies,
        strategy_interval: None,
        start_date: None,
        end_date: None,
        drawdown_percentage: 100.0,
    }
}

#[test]
fn split_vote_never_trades() {
    let mut backtester = Backtester::new(
        bars(&rising(60)),
        settings(vec![crossover(vec![sma(2, 5), sma(5, 2)])], true),
    )
    .unwrap();

    assert_eq!(backtester.run().unwrap(), Outcome::Passed);
    assert!(backtester.trader().trades().is_empty());
    assert_eq!(backtester.report().net, 1000.0);
}

#[test]
fn follows_a_trend_and_closes_at_the_end() {
    let mut prices = rising(40);
    prices.extend((0..40).map(|i| 139.0 - i as f64));
    let data = bars(&prices);
    let mut backtester =
        Backtester::new(data.clone(), settings(vec![crossover(vec![sma(2, 5)])], false)).unwrap();

    assert_eq!(backtester.run().unwrap(), Outcome::Passed);
    let trades = backtester.trader().trades();
    assert_eq!(
        trades[0].action,
        "Entered long because a bullish trend was detected."
    );
    // trend from bar 4 acts on bar 5
    assert_eq!(trades[0].timestamp, data[5].timestamp);
    assert!(trades
        .iter()
        .any(|t| t.action == "Exited long because a bearish trend was detected."));
    assert_eq!(backtester.trader().position(), None);
}

#[test]
fn descending_input_is_reversed() {
    let mut data = bars(&rising(30));
    data.reverse();
    let mut backtester =
        Backtester::new(data, settings(vec![crossover(vec![sma(2, 5)])], false)).unwrap();
    backtester.run().unwrap();

    let report = backtester.report();
    assert!(report.start_period < report.end_period);
    assert!(backtester.data()[0].timestamp < backtester.data()[29].timestamp);
    assert!(report.profit > 0.0);
}

#[test]
fn runs_out_of_money_on_a_squeezed_short() {
    let mut prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
    prices.extend(std::iter::repeat(10_000.0).take(10));
    let mut backtester = Backtester::new(
        bars(&prices),
        settings(vec![crossover(vec![sma(2, 5)])], true),
    )
    .unwrap();
    let (tx, mut rx) = mpsc::channel(1024);
    backtester.set_event_bus(EventBus::new(tx));

    assert_eq!(backtester.run().unwrap(), Outcome::OutOfMoney);
    let trades = backtester.trader().trades();
    assert_eq!(
        trades[0].action,
        "Entered short because a bearish trend was detected."
    );
    assert_eq!(
        trades.last().unwrap().action,
        "Exited short position because backtest ended."
    );
    assert_eq!(backtester.trader().position(), None);

    let mut saw_message = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Message(text) = event {
            saw_message |= text.contains("ran out of money");
        }
    }
    assert!(saw_message);
}

#[test]
fn drawdown_limit_stops_the_run() {
    let mut prices = rising(30);
    prices.extend(std::iter::repeat(50.0).take(20));
    let mut config = settings(vec![crossover(vec![sma(2, 5)])], false);
    config.drawdown_percentage = 10.0;
    let mut backtester = Backtester::new(bars(&prices), config).unwrap();

    assert_eq!(backtester.run().unwrap(), Outcome::Drawdown);
    assert_eq!(backtester.trader().position(), None);
    assert!(backtester.report().net < 900.0);
}

#[test]
fn cancelled_run_reports_cancellation() {
    let mut backtester = Backtester::new(
        bars(&rising(50)),
        settings(vec![crossover(vec![sma(2, 5)])], false),
    )
    .unwrap();
    backtester.running_flag().store(false, Ordering::SeqCst);

    let err = backtester.run().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "Backtest was canceled.");
    assert!(backtester.trader().trades().is_empty());
}

#[test]
fn coarser_strategy_interval_waits_for_aggregated_bars() {
    let data = bars(&rising(60));
    let mut config = settings(vec![crossover(vec![sma(2, 3)])], false);
    config.strategy_interval = Some("5m".parse().unwrap());
    let mut backtester = Backtester::new(data.clone(), config).unwrap();
    assert_eq!(backtester.gap_multiplier(), 5);

    assert_eq!(backtester.run().unwrap(), Outcome::Passed);
    let trades = backtester.trader().trades();
    // the second merged bar lands at bar 10, its first trend acts on bar 11
    assert_eq!(trades[0].timestamp, data[11].timestamp);
}

/// Five-minute periods that fall 10 per minute inside the period but close 10
/// higher than the period before.
fn falling_minutes_rising_periods(periods: usize) -> Vec<f64> {
    (0..periods * 5)
        .map(|i| 140.0 + 10.0 * (i / 5) as f64 - 10.0 * (i % 5) as f64)
        .collect()
}

#[test]
fn ema_crossover_reads_aggregated_bars() {
    let data = bars(&falling_minutes_rising_periods(24));
    let mut config = settings(
        vec![crossover(vec![MovingAverageOption {
            average: AverageKind::Ema,
            price: PriceField::Close,
            short: 2,
            long: 3,
        }])],
        false,
    );
    config.strategy_interval = Some("5m".parse().unwrap());
    let mut backtester = Backtester::new(data.clone(), config).unwrap();

    assert_eq!(backtester.run().unwrap(), Outcome::Passed);
    let actions: Vec<&str> = backtester
        .trader()
        .trades()
        .iter()
        .map(|t| t.action.as_str())
        .collect();
    // per-minute closes would turn bearish inside every period
    assert_eq!(
        actions,
        vec![
            "Entered long because a bullish trend was detected.",
            "Exited long position because backtest ended.",
        ]
    );
    assert_eq!(backtester.trader().trades()[0].timestamp, data[11].timestamp);
}

#[test]
fn stoic_on_aggregated_bars_matches_the_same_bars_fed_directly() {
    let stoic = StrategyConfig::Stoic(StoicParams {
        input1: 3,
        input2: 4,
        input3: 3,
        bullish_threshold: 0.5,
        bearish_threshold: 0.5,
    });
    let minutes: Vec<f64> = (0..300)
        .map(|i| 200.0 + 30.0 * ((i as f64) / 23.0).sin() + ((i * 7) % 5) as f64)
        .collect();
    let data = bars(&minutes);

    let mut coarse = settings(vec![stoic.clone()], false);
    coarse.strategy_interval = Some("5m".parse().unwrap());
    let mut backtester = Backtester::new(data.clone(), coarse).unwrap();
    backtester.run().unwrap();

    // Fed only the committed five-minute bars, one call per bar.
    let periods: Vec<Bar> = data
        .chunks(5)
        .filter_map(algotrail::core::backtester::aggregate)
        .collect();
    let mut direct = strategies::build(&stoic).unwrap();
    let mut trends = Vec::new();
    for end in direct.min_period()..=periods.len() {
        trends.push((periods[end - 1].timestamp, direct.get_trend(&periods[..end]).unwrap()));
    }
    assert!(trends.iter().any(|(_, t)| t.is_some()));

    // Shown every minute of a period as a growing partial bar first, the way
    // the backtester does, the finished period must give the same trend.
    let mut replay = strategies::build(&stoic).unwrap();
    let mut view: Vec<Bar> = Vec::new();
    for (k, period) in periods.iter().enumerate() {
        for m in 1..=5 {
            let partial = algotrail::core::backtester::aggregate(&data[k * 5..k * 5 + m]).unwrap();
            view.push(partial);
            if view.len() >= replay.min_period() {
                let trend = replay.get_trend(&view).unwrap();
                if m == 5 {
                    let expected = trends
                        .iter()
                        .find(|(ts, _)| *ts == period.timestamp)
                        .map(|(_, t)| *t);
                    if let Some(expected) = expected {
                        assert_eq!(trend, expected, "period starting {}", period.timestamp);
                    }
                }
            }
            view.pop();
        }
        view.push(period.clone());
    }
}

#[test]
fn optimizer_records_a_row_per_combination() {
    let backtester = Backtester::new(
        bars(&rising(80)),
        settings(vec![crossover(vec![sma(2, 5)])], false),
    )
    .unwrap();
    let grid: OptimizerGrid = serde_json::from_str(
        r#"{
            "loss_types": ["stop"],
            "loss_percentages": [1, 5],
            "strategies": [
                [{"type": "moving_average", "options": [{"average": "sma", "short": 2, "long": 5}]}],
                [{"type": "moving_average", "options": [{"average": "ema", "short": 3, "long": 8}]}]
            ]
        }"#,
    )
    .unwrap();

    let mut optimizer = Optimizer::new(backtester);
    let rows = optimizer.optimize(&grid).unwrap().to_vec();

    assert_eq!(rows.len(), 4);
    let runs: Vec<&str> = rows.iter().map(|r| r.run.as_str()).collect();
    assert_eq!(runs, vec!["1/4", "2/4", "3/4", "4/4"]);
    assert!(rows.iter().all(|r| r.result == Outcome::Passed));
    assert!(rows.iter().all(|r| r.stop_loss_strategy == "Stop Loss"));
    assert_eq!(rows[0].stop_loss_percentage, "1.00%");
    assert!(rows.iter().all(|r| r.profit_percentage > 0.0));
    assert!(optimizer.backtester().trader().trades().is_empty());
}

#[test]
fn optimizer_keeps_configured_exits_when_the_grid_skips_them() {
    let mut config = settings(vec![crossover(vec![sma(2, 5)])], false);
    config.trader.loss = Some(LossSettings {
        strategy: LossStrategy::Trailing,
        percentage: 0.03,
        smart_stop_loss_counter: 0,
        safety_timer: None,
    });
    config.trader.take_profit = Some(0.2);
    let backtester = Backtester::new(bars(&rising(60)), config).unwrap();
    let grid: OptimizerGrid = serde_json::from_str(
        r#"{
            "strategies": [
                [{"type": "moving_average", "options": [{"average": "sma", "short": 2, "long": 5}]}],
                [{"type": "moving_average", "options": [{"average": "wma", "short": 3, "long": 6}]}]
            ]
        }"#,
    )
    .unwrap();

    let mut optimizer = Optimizer::new(backtester);
    let rows = optimizer.optimize(&grid).unwrap().to_vec();

    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.stop_loss_strategy, "Trailing Loss");
        assert_eq!(row.stop_loss_percentage, "3.00%");
        assert_eq!(row.take_profit_percentage, "20.00%");
    }
    let settings = optimizer.backtester().trader().settings();
    assert_eq!(settings.loss.as_ref().map(|l| l.percentage), Some(0.03));
    assert_eq!(settings.take_profit, Some(0.2));
}
