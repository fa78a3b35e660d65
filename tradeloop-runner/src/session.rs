//! Trading session: wires collaborators from a [`BotConfig`] and drives the
//! lifecycle controller for a fixed number of iterations.
//!
//! Two clocks are supported. `Clock::Wall` sleeps between iterations and
//! stamps them with the current time; `Clock::Simulated` advances a virtual
//! clock by the interval without sleeping, which suits synthetic and replay
//! markets as well as tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tradeloop_core::domain::TradeRecord;
use tradeloop_core::ports::{
    AmbiguityResolver, MarketDataProvider, NoopResolver, ProviderError, SentimentProvider,
    StateStore,
};
use tradeloop_core::{Collaborators, Controller, EngineError, IterationOutcome};

use crate::cache::CachedSentiment;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{BotConfig, ConfigError, MarketSource, ResolverSource, SentimentSource};
use crate::metrics::{render_report, PerformanceSnapshot};
use crate::persistence::JsonStateStore;
use crate::providers::{
    binance, sentiment, BinanceProvider, CsvReplay, FearGreedProvider, PaperExecutor,
    StaticSentiment, SyntheticMarket,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("collaborator setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Wall,
    Simulated { start: DateTime<Utc> },
}

/// About a thousand years; keeps simulated timestamps inside chrono's range.
const MAX_SIMULATED_OFFSET_SECS: i64 = 1_000 * 365 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionPlan {
    pub iterations: u64,
    pub interval: Duration,
    pub clock: Clock,
}

impl SessionPlan {
    /// `duration / interval` iterations, at least one.
    pub fn from_config(config: &BotConfig, clock: Clock) -> Self {
        let interval_secs = config.session.interval_secs.max(1);
        let iterations = (config.session.duration_minutes * 60 / interval_secs).max(1);
        Self {
            iterations,
            interval: Duration::from_secs(interval_secs),
            clock,
        }
    }

    fn timestamp(&self, iteration: u64) -> DateTime<Utc> {
        match self.clock {
            Clock::Wall => Utc::now(),
            Clock::Simulated { start } => {
                let secs = i64::try_from(self.interval.as_secs()).unwrap_or(i64::MAX);
                let offset = secs.saturating_mul(i64::try_from(iteration).unwrap_or(i64::MAX));
                start + chrono::Duration::seconds(offset.min(MAX_SIMULATED_OFFSET_SECS))
            }
        }
    }
}

/// Iteration outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub skipped: u64,
    pub rejected: u64,
    pub opened: u64,
    pub held: u64,
    pub closed: u64,
    pub open_failed: u64,
    pub errors: u64,
}

impl OutcomeTally {
    fn record(&mut self, outcome: &IterationOutcome) {
        match outcome {
            IterationOutcome::Skipped => self.skipped += 1,
            IterationOutcome::Rejected(_) => self.rejected += 1,
            IterationOutcome::Opened(_) => self.opened += 1,
            IterationOutcome::Held => self.held += 1,
            IterationOutcome::Closed(_) => self.closed += 1,
            IterationOutcome::OpenFailed => self.open_failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub symbol: String,
    pub iterations: u64,
    pub cancelled: bool,
    pub tally: OutcomeTally,
    pub start_capital: f64,
    pub end_capital: f64,
    /// Trades closed during this session only.
    pub trades: Vec<TradeRecord>,
    pub performance: PerformanceSnapshot,
    /// A position the final close could not flatten.
    pub position_left_open: bool,
}

impl SessionReport {
    pub fn render(&self) -> String {
        let mut out = format!(
            "session {} | iterations {}{} | opened {} closed {} rejected {} skipped {} errors {}\n",
            self.symbol,
            self.iterations,
            if self.cancelled { " (cancelled)" } else { "" },
            self.tally.opened,
            self.tally.closed,
            self.tally.rejected,
            self.tally.skipped,
            self.tally.errors,
        );
        if self.position_left_open {
            out.push_str("WARNING: a position is still open\n");
        }
        out.push_str(&render_report(&self.performance, self.start_capital));
        out
    }
}

pub struct Session {
    controller: Controller,
    plan: SessionPlan,
    stop: Arc<AtomicBool>,
}

impl Session {
    pub fn new(controller: Controller, plan: SessionPlan) -> Self {
        Self {
            controller,
            plan,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build collaborators from `config`, restore persisted state, and plan
    /// the session.
    pub fn from_config(config: &BotConfig, clock: Clock) -> Result<Self, SessionError> {
        config.validate()?;
        let collaborators = build_collaborators(config)?;
        let mut controller =
            Controller::new(config.session.symbol.clone(), config.engine.clone(), collaborators)?;
        if controller.restore()? {
            info!(symbol = %controller.symbol(), "resuming from saved state");
        }
        Ok(Self::new(controller, SessionPlan::from_config(config, clock)))
    }

    /// Setting the flag stops the loop before the next iteration.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        let symbol = self.controller.symbol().to_string();
        let start_capital = self.controller.risk_state().capital;
        let trades_before = self.controller.trades().len();
        let mut tally = OutcomeTally::default();
        let mut iterations = 0;
        let mut cancelled = false;

        info!(
            %symbol,
            iterations = self.plan.iterations,
            interval_secs = self.plan.interval.as_secs(),
            capital = start_capital,
            config = %self.controller.config().fingerprint(),
            "session started"
        );

        for i in 0..self.plan.iterations {
            if self.stop.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if i > 0 {
                self.pause();
            }
            let now = self.plan.timestamp(i);
            iterations += 1;
            match self.controller.run_iteration(now) {
                Ok(outcome) => {
                    log_outcome(&symbol, i, &outcome);
                    tally.record(&outcome);
                }
                Err(err @ EngineError::CloseEscalation { .. }) => {
                    tally.errors += 1;
                    error!(%symbol, iteration = i, alert = true, error = %err, "close failed, position still open");
                }
                Err(err) if err.is_recoverable() => {
                    tally.errors += 1;
                    error!(%symbol, iteration = i, error = %err, "iteration failed");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let end = self.plan.timestamp(iterations);
        if let Err(err) = self.controller.finish_session(end) {
            tally.errors += 1;
            error!(%symbol, alert = true, error = %err, "could not close position at session end");
        }

        let trades = self.controller.trades()[trades_before..].to_vec();
        let session_minutes = iterations as f64 * self.plan.interval.as_secs_f64() / 60.0;
        let performance = PerformanceSnapshot::compute(&trades, start_capital, session_minutes);
        let report = SessionReport {
            symbol,
            iterations,
            cancelled,
            tally,
            start_capital,
            end_capital: self.controller.risk_state().capital,
            trades,
            performance,
            position_left_open: self.controller.position().is_some(),
        };
        info!(
            symbol = %report.symbol,
            iterations = report.iterations,
            trades = report.trades.len(),
            pnl = report.performance.total_pnl,
            end_capital = report.end_capital,
            "session finished"
        );
        Ok(report)
    }

    // Sleep in short slices so a stop request is noticed promptly.
    fn pause(&self) {
        if matches!(self.plan.clock, Clock::Simulated { .. }) {
            return;
        }
        let slice = Duration::from_millis(250);
        let mut left = self.plan.interval;
        while !left.is_zero() && !self.stop.load(Ordering::SeqCst) {
            let nap = left.min(slice);
            std::thread::sleep(nap);
            left -= nap;
        }
    }
}

fn log_outcome(symbol: &str, iteration: u64, outcome: &IterationOutcome) {
    match outcome {
        IterationOutcome::Skipped => warn!(symbol, iteration, "iteration skipped"),
        IterationOutcome::Rejected(veto) => match veto.as_error() {
            Some(err) => warn!(symbol, iteration, error = %err, "entry blocked"),
            None => info!(symbol, iteration, %veto, "no entry"),
        },
        IterationOutcome::Opened(p) => info!(
            symbol,
            iteration,
            side = %p.side,
            entry = p.entry_price,
            size = p.size,
            stop = p.stop_loss,
            target = p.take_profit,
            "opened"
        ),
        IterationOutcome::Held => debug!(symbol, iteration, "holding"),
        IterationOutcome::Closed(t) => info!(symbol, iteration, reason = %t.reason, pnl = t.pnl, "closed"),
        IterationOutcome::OpenFailed => error!(symbol, iteration, "open failed after retries"),
    }
}

/// Instantiate market, execution, sentiment and storage for `config`.
pub fn build_collaborators(config: &BotConfig) -> Result<Collaborators, SessionError> {
    let timeout = Duration::from_secs(config.market.timeout_secs);
    let market: Arc<dyn MarketDataProvider> = match config.market.provider {
        MarketSource::Binance => {
            let url = config.market.base_url.clone().unwrap_or_else(|| {
                if config.market.testnet {
                    binance::TESTNET_URL.to_string()
                } else {
                    binance::MAINNET_URL.to_string()
                }
            });
            let breaker = Arc::new(CircuitBreaker::new(
                "binance",
                Duration::from_secs(config.market.breaker_cooldown_secs),
                3,
            ));
            Arc::new(BinanceProvider::new(url, breaker, timeout)?)
        }
        MarketSource::Synthetic => Arc::new(SyntheticMarket::new(
            config.market.seed,
            config.market.start_price,
            Utc::now(),
            &config.engine.lifecycle.signal_interval,
        )?),
        MarketSource::Csv => {
            let path = config.market.csv_path.as_ref().ok_or_else(|| {
                ConfigError::Validation(vec!["market.csv_path is required".into()])
            })?;
            let warmup = config.engine.timeframes.candle_limit;
            Arc::new(CsvReplay::from_path(path, &config.market.csv_interval, warmup)?)
        }
    };

    let sentiment_source: Arc<dyn SentimentProvider> = match config.sentiment.provider {
        SentimentSource::FearGreed => {
            let url = config
                .sentiment
                .url
                .clone()
                .unwrap_or_else(|| sentiment::FEAR_GREED_URL.to_string());
            let breaker = Arc::new(CircuitBreaker::for_exchange("fear_greed"));
            let inner = Arc::new(FearGreedProvider::new(
                url,
                breaker,
                Duration::from_secs(config.sentiment.timeout_secs.max(1)),
            )?);
            Arc::new(CachedSentiment::new(
                inner,
                Duration::from_secs(config.sentiment.cache_ttl_secs),
            ))
        }
        SentimentSource::Static => Arc::new(StaticSentiment::new(
            tradeloop_core::domain::SentimentReading::new(
                config.sentiment.static_score,
                config.sentiment.static_risk,
            ),
        )),
    };

    let executor = Arc::new(PaperExecutor::new(
        Arc::clone(&market),
        config.engine.lifecycle.signal_interval.clone(),
        config.execution.slippage_bps,
    ));
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::open(&config.paths.state_dir)?);
    let resolver: Arc<dyn AmbiguityResolver> = match config.resolver.provider {
        ResolverSource::None => Arc::new(NoopResolver),
    };

    info!(
        market = market.name(),
        sentiment = sentiment_source.name(),
        resolver = resolver.name(),
        executor = "paper",
        state_dir = %config.paths.state_dir.display(),
        "collaborators ready"
    );
    Ok(Collaborators::new(market, executor, sentiment_source, store).with_resolver(resolver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn plan_divides_duration_by_interval() {
        let mut config = BotConfig::default();
        config.session.duration_minutes = 10;
        config.session.interval_secs = 60;
        let plan = SessionPlan::from_config(&config, Clock::Wall);
        assert_eq!(plan.iterations, 10);

        config.session.interval_secs = 3600;
        assert_eq!(SessionPlan::from_config(&config, Clock::Wall).iterations, 1);
    }

    #[test]
    fn simulated_clock_steps_by_interval() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let plan = SessionPlan {
            iterations: 3,
            interval: Duration::from_secs(300),
            clock: Clock::Simulated { start },
        };
        assert_eq!(plan.timestamp(0), start);
        assert_eq!(plan.timestamp(2), start + chrono::Duration::minutes(10));
    }

    #[test]
    fn simulated_clock_does_not_wrap_on_long_plans() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let plan = SessionPlan {
            iterations: u64::MAX,
            interval: Duration::from_secs(1),
            clock: Clock::Simulated { start },
        };
        // Past i32::MAX iterations.
        let far = 1u64 << 31;
        assert_eq!(
            plan.timestamp(far),
            start + chrono::Duration::seconds(far as i64)
        );
        assert!(plan.timestamp(u64::MAX) > plan.timestamp(far));
    }

    #[test]
    fn tally_counts_each_outcome() {
        let mut tally = OutcomeTally::default();
        tally.record(&IterationOutcome::Skipped);
        tally.record(&IterationOutcome::Held);
        tally.record(&IterationOutcome::Held);
        tally.record(&IterationOutcome::OpenFailed);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.held, 2);
        assert_eq!(tally.open_failed, 1);
        assert_eq!(tally.opened, 0);
    }

    #[test]
    fn offline_collaborators_use_the_configured_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BotConfig::default();
        config.market.provider = MarketSource::Synthetic;
        config.sentiment.provider = SentimentSource::Static;
        config.resolver.provider = ResolverSource::None;
        config.paths.state_dir = dir.path().to_path_buf();

        let collaborators = build_collaborators(&config).unwrap();
        assert_eq!(collaborators.resolver.name(), "noop");
        assert_eq!(collaborators.market.name(), "synthetic");
    }
}
