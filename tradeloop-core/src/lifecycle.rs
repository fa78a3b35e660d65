//! Position lifecycle controller.
//!
//! One iteration of the trading loop, with collaborators injected:
//!
//! ```text
//! advance the market tape (replayed and simulated feeds only)
//! refresh risk state (day roll, drawdown)
//! if a position is open:
//!     trail the stop, then exit on stop-loss > take-profit > reversal > max holding time
//! else:
//!     evaluate (timeframes, regime, strategy, sentiment fusion)
//!     approve, size, place the order
//! ```
//!
//! States: Idle -> Evaluating -> Open -> Monitoring -> Closing -> Idle.
//! At most one position exists at a time. Orders are only placed after the
//! risk manager approves, and a position is only forgotten once the executor
//! confirms the close.

use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::domain::{Action, CloseReason, Position, PositionSide, Signal, TradeRecord};
use crate::error::EngineError;
use crate::fusion::{FusedSignal, ResolverBudget, SignalFusion};
use crate::indicators::{compute_snapshot, IndicatorSnapshot};
use crate::patterns::{PatternRecognizer, PatternReport};
use crate::ports::{
    AmbiguityResolver, Fill, MarketDataProvider, NoopResolver, OrderExecutor, PersistedState,
    ProviderError, SentimentProvider, StateStore,
};
use crate::regime::{RegimeAnalysis, RegimeClassifier, StrategyFamily};
use crate::risk::{RiskManager, RiskState, TradeStats, Veto};
use crate::strategy::{SignalGenerator, Strategy};
use crate::timeframe::{MultiTimeframeAggregator, TimeframeSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Interval whose candles drive the strategy, patterns and price checks.
    pub signal_interval: String,
    /// Trailing stop distance as a fraction of price.
    pub trailing_pct: f64,
    /// Force-close after this many minutes. `None` disables the limit.
    pub max_holding_minutes: Option<i64>,
    /// Extra attempts after the first failed open.
    pub open_retries: u32,
    /// Extra attempts after the first failed close.
    pub close_retries: u32,
    /// Base backoff; doubled after every failed attempt.
    pub retry_backoff_ms: u64,
    pub allow_short: bool,
    /// Use Kelly sizing once enough trades are recorded.
    pub dynamic_sizing: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            signal_interval: "5m".into(),
            trailing_pct: 0.01,
            max_holding_minutes: None,
            open_retries: 2,
            close_retries: 3,
            retry_backoff_ms: 500,
            allow_short: true,
            dynamic_sizing: true,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.signal_interval.trim().is_empty() {
            problems.push("lifecycle.signal_interval must not be empty".into());
        }
        if !(self.trailing_pct >= 0.0 && self.trailing_pct < 1.0) {
            problems.push("lifecycle.trailing_pct must be in [0, 1)".into());
        }
        if matches!(self.max_holding_minutes, Some(m) if m <= 0) {
            problems.push("lifecycle.max_holding_minutes must be > 0 when set".into());
        }
        problems
    }
}

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: StdDuration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_ms: u64) -> Self {
        Self {
            attempts: retries + 1,
            backoff: StdDuration::from_millis(backoff_ms),
        }
    }

    /// Run `op` until it succeeds or attempts run out. A tripped circuit
    /// breaker is not retried. On failure returns the attempts made and the
    /// last error.
    pub fn run<T>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, ProviderError>,
    ) -> Result<T, (u32, ProviderError)> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err @ ProviderError::CircuitOpen) => return Err((attempt, err)),
                Err(err) if attempt >= self.attempts => return Err((attempt, err)),
                Err(err) => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// External collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketDataProvider>,
    pub executor: Arc<dyn OrderExecutor>,
    pub sentiment: Arc<dyn SentimentProvider>,
    pub resolver: Arc<dyn AmbiguityResolver>,
    pub store: Arc<dyn StateStore>,
}

impl Collaborators {
    /// Collaborators with the no-op ambiguity resolver.
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        executor: Arc<dyn OrderExecutor>,
        sentiment: Arc<dyn SentimentProvider>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            market,
            executor,
            sentiment,
            resolver: Arc::new(NoopResolver),
            store,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AmbiguityResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Evaluating,
    Open,
    Monitoring,
    Closing,
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// Data was unavailable; nothing changed.
    Skipped,
    /// No entry this time.
    Rejected(Veto),
    Opened(Position),
    /// Position still open after checks.
    Held,
    Closed(TradeRecord),
    /// Open retries exhausted; back to idle.
    OpenFailed,
}

/// Everything the decision pipeline produced for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub price: f64,
    pub indicators: IndicatorSnapshot,
    pub patterns: PatternReport,
    pub summaries: Vec<TimeframeSummary>,
    pub regime: RegimeAnalysis,
    /// `None` when the regime says avoid.
    pub strategy: Option<StrategyFamily>,
    pub technical: Signal,
    pub fused: FusedSignal,
}

pub struct Controller {
    symbol: String,
    config: EngineConfig,
    collaborators: Collaborators,
    risk: RiskManager,
    fusion: SignalFusion,
    aggregator: MultiTimeframeAggregator,
    classifier: RegimeClassifier,
    recognizer: PatternRecognizer,
    open_retry: RetryPolicy,
    close_retry: RetryPolicy,
    risk_state: RiskState,
    position: Option<Position>,
    trades: Vec<TradeRecord>,
    state: LifecycleState,
}

impl Controller {
    pub fn new(
        symbol: impl Into<String>,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let lc = &config.lifecycle;
        Ok(Self {
            symbol: symbol.into(),
            risk: RiskManager::new(config.risk.clone()),
            fusion: SignalFusion::new(config.fusion.clone()),
            aggregator: MultiTimeframeAggregator::new(
                config.timeframes.clone(),
                config.indicators.clone(),
            ),
            classifier: RegimeClassifier::new(config.regime.clone()),
            recognizer: PatternRecognizer::new(config.patterns.clone()),
            open_retry: RetryPolicy::new(lc.open_retries, lc.retry_backoff_ms),
            close_retry: RetryPolicy::new(lc.close_retries, lc.retry_backoff_ms),
            risk_state: RiskState::new(config.risk.capital),
            position: None,
            trades: Vec::new(),
            state: LifecycleState::Idle,
            collaborators,
            config,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk_state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Load persisted risk state, open position and trade log. Returns
    /// whether a previous state was found.
    pub fn restore(&mut self) -> Result<bool, EngineError> {
        let store = &self.collaborators.store;
        self.trades = store
            .load_trades()
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let Some(saved) = store
            .load_state()
            .map_err(|e| EngineError::Persistence(e.to_string()))?
        else {
            return Ok(false);
        };

        if let Some(position) = saved.open_position.as_ref() {
            if position.symbol != self.symbol {
                return Err(EngineError::Persistence(format!(
                    "saved position is for {}, controller trades {}",
                    position.symbol, self.symbol
                )));
            }
        }
        self.risk_state = saved.risk_state;
        self.position = saved.open_position;
        self.state = if self.position.is_some() {
            LifecycleState::Monitoring
        } else {
            LifecycleState::Idle
        };
        info!(
            capital = self.risk_state.capital,
            trades = self.trades.len(),
            open_position = self.position.is_some(),
            "state restored"
        );
        Ok(true)
    }

    /// Run one loop iteration at `now`.
    pub fn run_iteration(&mut self, now: DateTime<Utc>) -> Result<IterationOutcome, EngineError> {
        if let Err(err) = self.collaborators.market.advance(&self.symbol) {
            warn!(symbol = %self.symbol, error = %err, "market did not advance, skipping iteration");
            return Ok(IterationOutcome::Skipped);
        }
        self.refresh_risk(now);
        let mut budget = ResolverBudget::per_iteration();

        if self.position.is_some() {
            self.state = LifecycleState::Monitoring;
            return self.monitor(now, &mut budget);
        }

        self.state = LifecycleState::Evaluating;
        let evaluation = match self.evaluate(&mut budget) {
            Ok(evaluation) => evaluation,
            Err(EngineError::DataUnavailable(reason)) => {
                warn!(symbol = %self.symbol, %reason, "data unavailable, skipping iteration");
                self.state = LifecycleState::Idle;
                return Ok(IterationOutcome::Skipped);
            }
            Err(err) => {
                self.state = LifecycleState::Idle;
                return Err(err);
            }
        };
        self.open_from(&evaluation, now)
    }

    /// Run the decision pipeline. Pure with respect to controller state.
    pub fn evaluate(&self, budget: &mut ResolverBudget) -> Result<Evaluation, EngineError> {
        let market = self.collaborators.market.as_ref();
        let candles = market.candles(
            &self.symbol,
            &self.config.lifecycle.signal_interval,
            self.config.timeframes.candle_limit,
        )?;
        let price = candles
            .last()
            .map(|c| c.close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| {
                EngineError::DataUnavailable(format!("no usable price for {}", self.symbol))
            })?;

        let indicators = compute_snapshot(&candles, &self.config.indicators);
        let patterns = self.recognizer.detect(&candles);
        let summaries = self.aggregator.summarize(&self.symbol, market)?;
        let regime = self.classifier.classify(&indicators, &summaries);

        let strategy = Strategy::for_regime(&regime, &self.config.strategy);
        let technical = match &strategy {
            Some(s) => s.generate(&candles, &indicators, &patterns, &summaries),
            None => Signal::hold(format!("{:?} regime, avoiding", regime.regime)),
        };

        let sentiment = self.collaborators.sentiment.compiled_score(&self.symbol)?;
        let fused = self.fusion.fuse(
            &self.symbol,
            &technical,
            &sentiment,
            self.collaborators.resolver.as_ref(),
            budget,
        );

        debug!(
            symbol = %self.symbol,
            price,
            regime = ?regime.regime,
            strategy = strategy.as_ref().map(|s| s.name()).unwrap_or("none"),
            technical = %technical.action,
            technical_confidence = technical.confidence,
            fused = %fused.signal.action,
            fused_confidence = fused.signal.confidence,
            "evaluated"
        );

        Ok(Evaluation {
            price,
            indicators,
            patterns,
            summaries,
            regime,
            strategy: strategy.as_ref().map(Strategy::family),
            technical,
            fused,
        })
    }

    /// Try to open a position from an evaluation. Vetoes leave no trace.
    pub fn open_from(
        &mut self,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<IterationOutcome, EngineError> {
        match self.entry_plan(evaluation) {
            Ok(plan) => Ok(self.place_entry(plan, now)),
            Err(veto) => {
                if let Some(err) = veto.as_error() {
                    warn!(symbol = %self.symbol, error = %err, "entry blocked");
                } else {
                    debug!(symbol = %self.symbol, %veto, "no entry");
                }
                self.state = LifecycleState::Idle;
                Ok(IterationOutcome::Rejected(veto))
            }
        }
    }

    /// Close the open position for `reason`. On success the position is gone
    /// and exactly one trade record exists for it. On failure the position is
    /// kept for the next iteration.
    pub fn close(
        &mut self,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<Option<TradeRecord>, EngineError> {
        let Some(position) = self.position.clone() else {
            return Ok(None);
        };
        self.state = LifecycleState::Closing;
        let executor = self.collaborators.executor.clone();
        let fill = self
            .close_retry
            .run(|_| executor.close_position(&position));

        let fill = match fill {
            Ok(fill) => fill,
            Err((attempts, err)) => {
                self.state = LifecycleState::Monitoring;
                let err = EngineError::CloseEscalation {
                    symbol: position.symbol.clone(),
                    attempts,
                    message: err.to_string(),
                };
                error!(error = %err, side = %position.side, size = position.size, "position still open");
                return Err(err);
            }
        };

        let record = TradeRecord::close(&position, fill.price, now, reason);
        self.risk_state = self.risk.record_trade(&self.risk_state, &record);
        self.trades.push(record.clone());
        self.position = None;
        self.state = LifecycleState::Idle;

        if let Err(err) = self.collaborators.store.append_trade(&record) {
            error!(trade = %record.id.0, error = %err, "failed to journal trade");
        }
        self.persist();

        info!(
            symbol = %record.symbol,
            side = %record.side,
            entry = record.entry_price,
            exit = record.exit_price,
            pnl = record.pnl,
            %reason,
            capital = self.risk_state.capital,
            "position closed"
        );
        Ok(Some(record))
    }

    /// Close whatever is open with `SessionEnd`.
    pub fn finish_session(&mut self, now: DateTime<Utc>) -> Result<Option<TradeRecord>, EngineError> {
        self.close(CloseReason::SessionEnd, now)
    }

    fn refresh_risk(&mut self, now: DateTime<Utc>) {
        let before = self.risk_state.clone();
        let next = self.risk.check_daily_limits(&before, &self.trades, now);
        let next = self.risk.update_drawdown(&next, next.capital);
        if next.daily_limit_hit && !before.daily_limit_hit {
            warn!(daily_loss = next.daily_loss, "daily loss limit reached, entries paused for the day");
        }
        if next.drawdown_paused != before.drawdown_paused {
            warn!(
                drawdown_pct = next.drawdown_pct,
                paused = next.drawdown_paused,
                "drawdown pause changed"
            );
        }
        if next != before {
            self.risk_state = next;
            self.persist();
        }
    }

    fn monitor(
        &mut self,
        now: DateTime<Utc>,
        budget: &mut ResolverBudget,
    ) -> Result<IterationOutcome, EngineError> {
        let price = match self.latest_price() {
            Ok(price) => price,
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "no price while monitoring, skipping");
                return Ok(IterationOutcome::Skipped);
            }
        };

        let Some(position) = self.position.as_mut() else {
            return Ok(IterationOutcome::Held);
        };
        if let Some(stop) = position.update_trailing(price, self.config.lifecycle.trailing_pct) {
            debug!(symbol = %position.symbol, stop, anchor = position.trailing_anchor, "trailing stop moved");
            self.persist();
        }

        let reason = match self.price_or_time_exit(price, now) {
            Some(reason @ (CloseReason::StopLoss | CloseReason::TakeProfit)) => Some(reason),
            timed => self.reversal(budget).or(timed),
        };

        match reason {
            Some(reason) => Ok(self
                .close(reason, now)?
                .map(IterationOutcome::Closed)
                .unwrap_or(IterationOutcome::Held)),
            None => Ok(IterationOutcome::Held),
        }
    }

    /// Price exits first, then the holding-time limit.
    fn price_or_time_exit(&self, price: f64, now: DateTime<Utc>) -> Option<CloseReason> {
        let position = self.position.as_ref()?;
        if let Some(reason) = position.price_exit(price) {
            return Some(reason);
        }
        let limit = self.config.lifecycle.max_holding_minutes?;
        (now - position.opened_at >= Duration::minutes(limit)).then_some(CloseReason::SessionEnd)
    }

    /// A confident signal against the open side.
    fn reversal(&self, budget: &mut ResolverBudget) -> Option<CloseReason> {
        let position = self.position.as_ref()?;
        let evaluation = match self.evaluate(budget) {
            Ok(evaluation) => evaluation,
            Err(err) => {
                debug!(error = %err, "reversal check skipped");
                return None;
            }
        };
        let signal = &evaluation.fused.signal;
        let against = signal.action == position.side.exit_action();
        (against && signal.confidence >= self.config.risk.confidence_threshold)
            .then_some(CloseReason::SignalReversal)
    }

    fn latest_price(&self) -> Result<f64, EngineError> {
        let candles = self.collaborators.market.candles(
            &self.symbol,
            &self.config.lifecycle.signal_interval,
            2,
        )?;
        candles
            .last()
            .map(|c| c.close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| EngineError::DataUnavailable(format!("no price for {}", self.symbol)))
    }

    fn entry_plan(&self, evaluation: &Evaluation) -> Result<EntryPlan, Veto> {
        if evaluation.regime.recommendation == StrategyFamily::Avoid {
            return Err(Veto::AvoidRegime);
        }
        let signal = &evaluation.fused.signal;
        let side = match signal.action {
            Action::Hold => return Err(Veto::NoDirection),
            action => PositionSide::from_action(action).ok_or(Veto::NoDirection)?,
        };
        if side == PositionSide::Short && !self.config.lifecycle.allow_short {
            return Err(Veto::ShortingDisabled);
        }
        self.risk.approve(&self.risk_state, signal.confidence)?;

        let risk_cfg = self.risk.config();
        let base_stop = if signal.stop_loss_pct > 0.0 {
            signal.stop_loss_pct
        } else {
            risk_cfg.base_stop_loss_pct
        };
        let stop_pct =
            self.risk
                .adaptive_stop_loss(evaluation.price, evaluation.indicators.atr, base_stop);
        let take_profit_pct = self.risk.take_profit_pct(stop_pct, signal.take_profit_pct);

        let capital = self.risk_state.capital;
        let notional = if self.config.lifecycle.dynamic_sizing {
            self.risk.dynamic_position_size(
                capital,
                &TradeStats::from_trades(&self.trades),
                evaluation.indicators.volatility_ratio(),
                stop_pct,
            )
        } else {
            self.risk.position_size(capital, risk_cfg.risk_pct, stop_pct)
        };
        let size = notional / evaluation.price;
        if !(size.is_finite() && size > 0.0) {
            return Err(Veto::ZeroSize);
        }

        Ok(EntryPlan {
            side,
            size,
            stop_pct,
            take_profit_pct,
            confidence: signal.confidence,
        })
    }

    fn place_entry(&mut self, plan: EntryPlan, now: DateTime<Utc>) -> IterationOutcome {
        let executor = self.collaborators.executor.clone();
        let symbol = self.symbol.clone();
        let result = self
            .open_retry
            .run(|_| executor.open_position(&symbol, plan.side, plan.size));

        let fill: Fill = match result {
            Ok(fill) => fill,
            Err((attempts, err)) => {
                let err = EngineError::OrderExecution {
                    attempts,
                    message: err.to_string(),
                };
                error!(symbol = %self.symbol, side = %plan.side, error = %err, "open aborted");
                self.state = LifecycleState::Idle;
                return IterationOutcome::OpenFailed;
            }
        };

        let position = Position::from_fill(
            &self.symbol,
            plan.side,
            fill.price,
            fill.size,
            plan.stop_pct,
            plan.take_profit_pct,
            now,
        );
        info!(
            symbol = %position.symbol,
            side = %position.side,
            price = position.entry_price,
            size = position.size,
            stop = position.stop_loss,
            target = position.take_profit,
            confidence = plan.confidence,
            "position opened"
        );
        self.position = Some(position.clone());
        self.state = LifecycleState::Open;
        self.persist();
        IterationOutcome::Opened(position)
    }

    fn persist(&self) {
        let snapshot = PersistedState {
            risk_state: self.risk_state.clone(),
            open_position: self.position.clone(),
        };
        if let Err(err) = self.collaborators.store.save_state(&snapshot) {
            error!(error = %err, "failed to persist state");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EntryPlan {
    side: PositionSide,
    /// Base-asset quantity.
    size: f64,
    stop_pct: f64,
    take_profit_pct: f64,
    confidence: f64,
}
