//! BDD tests for the session runner.
//!
//! Sessions run on a simulated clock against real runner components: CSV
//! replay market, paper executor, static sentiment and the JSON state store
//! in a temp directory.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tradeloop_core::domain::{Candle, CloseReason, PositionSide, RiskLevel, SentimentReading};
use tradeloop_core::ports::{MarketDataProvider, StateStore};
use tradeloop_core::{Collaborators, Controller, EngineConfig, IterationOutcome};
use tradeloop_runner::config::{MarketSource, SentimentSource};
use tradeloop_runner::providers::{CsvReplay, PaperExecutor, StaticSentiment};
use tradeloop_runner::{BotConfig, Clock, JsonStateStore, Session, SessionPlan};

// ────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

/// Five-minute candles compounding 0.3% per step.
fn uptrend(n: usize) -> Vec<Candle> {
    let mut prev = 100.0;
    (0..n)
        .map(|i| {
            let close = prev * 1.003;
            let c = Candle {
                timestamp: start() + chrono::Duration::minutes(5 * i as i64),
                open: prev,
                high: close * 1.002,
                low: prev * 0.998,
                close,
                volume: 1000.0,
            };
            prev = close;
            c
        })
        .collect()
}

/// Appends `n` candles that each close 1% below the previous close.
fn with_crash(mut candles: Vec<Candle>, n: usize) -> Vec<Candle> {
    let Some(last) = candles.last().copied() else {
        return candles;
    };
    let mut prev = last.close;
    for i in 1..=n {
        let close = prev * 0.99;
        candles.push(Candle {
            timestamp: last.timestamp + chrono::Duration::minutes(5 * i as i64),
            open: prev,
            high: prev * 1.001,
            low: close * 0.998,
            close,
            volume: 1000.0,
        });
        prev = close;
    }
    candles
}

fn controller_with(
    market: Arc<CsvReplay>,
    sentiment: SentimentReading,
    store: Arc<JsonStateStore>,
) -> Controller {
    let executor = Arc::new(PaperExecutor::new(market.clone(), "5m", 0.0));
    let collaborators = Collaborators::new(
        market,
        executor,
        Arc::new(StaticSentiment::new(sentiment)),
        store,
    );
    let mut controller = Controller::new("BTCUSDT", EngineConfig::default(), collaborators).unwrap();
    controller.restore().unwrap();
    controller
}

fn session_with(
    candles: Vec<Candle>,
    warmup: usize,
    sentiment: SentimentReading,
    store: Arc<JsonStateStore>,
    iterations: u64,
) -> Session {
    let market = Arc::new(CsvReplay::from_candles(candles, "5m", warmup).unwrap());
    let controller = controller_with(market, sentiment, store);
    Session::new(
        controller,
        SessionPlan {
            iterations,
            interval: Duration::from_secs(300),
            clock: Clock::Simulated { start: start() + chrono::Duration::days(5) },
        },
    )
}

fn calm() -> SentimentReading {
    SentimentReading::new(0.3, RiskLevel::Low)
}

// ────────────────────────────────────────────────────────────────
// Scenarios
// ────────────────────────────────────────────────────────────────

#[test]
fn bdd_scenario_uptrend_session_trades_and_flattens() {
    // GIVEN a steadily rising market and calm positive sentiment
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let mut session = session_with(uptrend(1300), 1000, calm(), store.clone(), 12);

    // WHEN the session runs to completion
    let report = session.run().unwrap();

    // THEN at least one long was opened and every trade made money
    assert_eq!(report.iterations, 12);
    assert!(report.tally.opened >= 1);
    assert!(!report.trades.is_empty());
    assert!(report.trades.iter().all(|t| t.pnl > 0.0));
    assert!(report.end_capital > report.start_capital);

    // AND nothing is left open
    assert!(!report.position_left_open);
    let saved = store.load_state().unwrap().unwrap();
    assert!(saved.open_position.is_none());
    assert_eq!(saved.risk_state.capital, report.end_capital);

    // AND the trade log on disk matches the report
    assert_eq!(store.load_trades().unwrap(), report.trades);
    assert_eq!(report.performance.total_trades, report.trades.len());
}

#[test]
fn bdd_scenario_restart_resumes_capital() {
    // GIVEN a first session that made money
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let first = session_with(uptrend(1300), 1000, calm(), store.clone(), 8)
        .run()
        .unwrap();

    // WHEN a new session starts on the same state directory
    let second = session_with(uptrend(1300), 1000, calm(), store.clone(), 1);

    // THEN it resumes from the saved capital and trade history
    assert_eq!(second.controller().risk_state().capital, first.end_capital);
    assert_eq!(second.controller().trades().len(), first.trades.len());
}

#[test]
fn bdd_scenario_high_risk_sentiment_blocks_entries() {
    // GIVEN a rising market but HIGH-risk sentiment
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let high = SentimentReading::new(0.9, RiskLevel::High);
    let mut session = session_with(uptrend(1300), 1000, high, store.clone(), 6);

    // WHEN the session runs
    let report = session.run().unwrap();

    // THEN every iteration is rejected and nothing is traded
    assert_eq!(report.tally.opened, 0);
    assert_eq!(report.tally.rejected, 6);
    assert!(report.trades.is_empty());
    assert_eq!(report.end_capital, report.start_capital);
    assert!(store.load_trades().unwrap().is_empty());
}

#[test]
fn bdd_scenario_exhausted_replay_skips_iterations() {
    // GIVEN a replay whose candles are all consumed by warmup
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let mut session = session_with(uptrend(300), 300, calm(), store, 4);

    // WHEN the session runs
    let report = session.run().unwrap();

    // THEN each iteration is skipped without error
    assert_eq!(report.tally.skipped, 4);
    assert_eq!(report.tally.errors, 0);
    assert!(report.trades.is_empty());
}

#[test]
fn bdd_scenario_stop_flag_cancels_before_first_iteration() {
    // GIVEN a session whose stop flag is already raised
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let mut session = session_with(uptrend(1300), 1000, calm(), store, 10);
    session.stop_handle().store(true, Ordering::SeqCst);

    // WHEN it runs
    let report = session.run().unwrap();

    // THEN no iteration executes
    assert!(report.cancelled);
    assert_eq!(report.iterations, 0);
    assert!(report.render().contains("cancelled"));
}

#[test]
fn bdd_scenario_session_from_toml_config() {
    // GIVEN a TOML config for an offline synthetic session
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
        [session]
        symbol = "ETHUSDT"
        duration_minutes = 30
        interval_secs = 300

        [market]
        provider = "synthetic"
        seed = 7

        [sentiment]
        provider = "static"

        [paths]
        state_dir = "{}"
        "#,
        dir.path().join("state").display()
    );
    let config = BotConfig::from_toml_str(&toml).unwrap();
    assert_eq!(config.market.provider, MarketSource::Synthetic);
    assert_eq!(config.sentiment.provider, SentimentSource::Static);

    // WHEN the session is built and run on a simulated clock
    let mut session = Session::from_config(&config, Clock::Simulated { start: start() }).unwrap();
    let report = session.run().unwrap();

    // THEN it runs every planned iteration and leaves state on disk
    assert_eq!(report.iterations, 6);
    assert!(!report.position_left_open);
    assert!(dir.path().join("state").join("state.json").exists());
    assert!(report.render().contains("PERFORMANCE REPORT"));
}

#[test]
fn bdd_scenario_replay_releases_one_candle_per_iteration() {
    // GIVEN a replayed uptrend with candles left after warmup
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let market = Arc::new(CsvReplay::from_candles(uptrend(1300), "5m", 1000).unwrap());
    let mut controller = controller_with(market.clone(), calm(), store);

    // WHEN iterations run through entry and monitoring
    let mut outcomes = Vec::new();
    for i in 0..8 {
        let before = market.remaining();
        let outcome = controller
            .run_iteration(start() + chrono::Duration::minutes(5 * i))
            .unwrap();

        // THEN each one consumes exactly one candle
        assert_eq!(before - market.remaining(), 1, "iteration {i}");

        // AND an entry fills at the close the evaluation saw
        if let IterationOutcome::Opened(position) = &outcome {
            let seen = market.candles("BTCUSDT", "5m", 1).unwrap();
            assert_eq!(position.entry_price, seen[0].close);
        }
        outcomes.push(outcome);
    }
    assert!(outcomes.iter().any(|o| matches!(o, IterationOutcome::Opened(_))));
    assert!(outcomes.iter().any(|o| matches!(o, IterationOutcome::Held)));
}

#[test]
fn bdd_scenario_stop_out_fills_on_the_trigger_candle() {
    // GIVEN a long opened in an uptrend that turns into a 1%-per-candle crash
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStateStore::open(dir.path()).unwrap());
    let candles = with_crash(uptrend(1006), 60);
    let market = Arc::new(CsvReplay::from_candles(candles, "5m", 1000).unwrap());
    let mut controller = controller_with(market.clone(), calm(), store);

    // WHEN the replay runs to the end
    let mut initial_stop = None;
    let mut checked = 0;
    for i in 0..66 {
        let now = start() + chrono::Duration::minutes(5 * i);
        match controller.run_iteration(now).unwrap() {
            IterationOutcome::Opened(position) => initial_stop = Some(position.stop_loss),
            IterationOutcome::Closed(trade) => {
                let stop = initial_stop.take().unwrap();
                // THEN no exit is more than one candle's move past the entry stop
                match trade.side {
                    PositionSide::Long => assert!(trade.exit_price >= stop * 0.99 - 1e-9),
                    PositionSide::Short => assert!(trade.exit_price <= stop * 1.01 + 1e-9),
                }
                if trade.side == PositionSide::Long
                    && matches!(trade.reason, CloseReason::StopLoss | CloseReason::SignalReversal)
                {
                    // AND the loss stays within the 3% stop ceiling plus that move
                    assert!(trade.return_pct() >= -(0.03 + 0.01));
                    checked += 1;
                }
            }
            _ => {}
        }
    }
    assert!(checked >= 1, "the crash should have stopped out the long");
}
