//! Risk manager: sizing, stops, drawdown and daily-loss gates.
//!
//! Everything here is pure. [`RiskState`] is passed in and a new value is
//! returned; the lifecycle controller is the only owner that stores it.
//!
//! Units: sizes returned by this module are quote-currency notionals. The
//! controller converts to base quantity at the fill price.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::TradeRecord;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Starting capital in quote currency.
    pub capital: f64,
    /// Fraction of capital risked per trade.
    pub risk_pct: f64,
    pub max_exposure_pct: f64,
    pub max_daily_loss_pct: f64,
    pub base_stop_loss_pct: f64,
    pub base_take_profit_pct: f64,
    /// ATR multiple used for the adaptive stop.
    pub atr_stop_multiplier: f64,
    pub max_stop_loss_pct: f64,
    /// Minimum take-profit distance as a multiple of the stop distance.
    pub min_reward_risk: f64,
    pub confidence_threshold: f64,
    pub drawdown_pause_pct: f64,
    pub drawdown_resume_pct: f64,
    pub kelly_warmup_trades: usize,
    pub kelly_max_fraction: f64,
    /// Kelly sizing is scaled by `1 / (1 + volatility / volatility_reference)`.
    pub volatility_reference: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            capital: 1000.0,
            risk_pct: 0.02,
            max_exposure_pct: 0.30,
            max_daily_loss_pct: 0.05,
            base_stop_loss_pct: 0.01,
            base_take_profit_pct: 0.02,
            atr_stop_multiplier: 1.0,
            max_stop_loss_pct: 0.03,
            min_reward_risk: 1.5,
            confidence_threshold: 0.45,
            drawdown_pause_pct: 0.03,
            drawdown_resume_pct: 0.02,
            kelly_warmup_trades: 10,
            kelly_max_fraction: 0.25,
            volatility_reference: 0.03,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let fraction = |v: f64| v > 0.0 && v <= 1.0;
        if !(self.capital > 0.0) {
            problems.push("risk.capital must be > 0".into());
        }
        for (name, value) in [
            ("risk.risk_pct", self.risk_pct),
            ("risk.max_exposure_pct", self.max_exposure_pct),
            ("risk.max_daily_loss_pct", self.max_daily_loss_pct),
            ("risk.base_stop_loss_pct", self.base_stop_loss_pct),
            ("risk.base_take_profit_pct", self.base_take_profit_pct),
            ("risk.max_stop_loss_pct", self.max_stop_loss_pct),
            ("risk.kelly_max_fraction", self.kelly_max_fraction),
        ] {
            if !fraction(value) {
                problems.push(format!("{name} must be in (0, 1]"));
            }
        }
        if self.base_stop_loss_pct > self.max_stop_loss_pct {
            problems.push("risk.base_stop_loss_pct must not exceed max_stop_loss_pct".into());
        }
        if !(self.atr_stop_multiplier > 0.0) {
            problems.push("risk.atr_stop_multiplier must be > 0".into());
        }
        if !(self.min_reward_risk > 0.0) {
            problems.push("risk.min_reward_risk must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            problems.push("risk.confidence_threshold must be in [0, 1]".into());
        }
        if !(self.drawdown_resume_pct < self.drawdown_pause_pct) {
            problems.push("risk.drawdown_resume_pct must be below drawdown_pause_pct".into());
        }
        if !(self.volatility_reference > 0.0) {
            problems.push("risk.volatility_reference must be > 0".into());
        }
        problems
    }
}

/// Capital and gate state. Owned by the lifecycle controller, persisted
/// between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub capital: f64,
    /// Highest capital seen. Never decreases.
    pub peak_capital: f64,
    pub drawdown_pct: f64,
    /// Net realized loss for the current day, as a positive number.
    pub daily_loss: f64,
    pub day: Option<NaiveDate>,
    pub day_start_capital: f64,
    pub drawdown_paused: bool,
    pub daily_limit_hit: bool,
    pub trades_completed: u64,
}

impl RiskState {
    pub fn new(capital: f64) -> Self {
        Self {
            capital,
            peak_capital: capital,
            drawdown_pct: 0.0,
            daily_loss: 0.0,
            day: None,
            day_start_capital: capital,
            drawdown_paused: false,
            daily_limit_hit: false,
            trades_completed: 0,
        }
    }

    pub fn trading_paused(&self) -> bool {
        self.drawdown_paused || self.daily_limit_hit
    }
}

/// Why an entry was not taken. Normal control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "veto")]
pub enum Veto {
    DrawdownPaused,
    DailyLimitHit,
    LowConfidence { confidence: f64, threshold: f64 },
    AvoidRegime,
    NoDirection,
    ShortingDisabled,
    ZeroSize,
}

impl Veto {
    /// Capital-risk vetoes surface as `RiskLimitExceeded`; the rest are silent.
    pub fn as_error(&self) -> Option<EngineError> {
        match self {
            Veto::DrawdownPaused => Some(EngineError::RiskLimitExceeded(
                "drawdown above pause threshold".into(),
            )),
            Veto::DailyLimitHit => Some(EngineError::RiskLimitExceeded(
                "daily loss limit reached".into(),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Veto::DrawdownPaused => f.write_str("trading paused on drawdown"),
            Veto::DailyLimitHit => f.write_str("daily loss limit hit"),
            Veto::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below threshold {threshold:.2}"),
            Veto::AvoidRegime => f.write_str("regime says avoid"),
            Veto::NoDirection => f.write_str("no directional signal"),
            Veto::ShortingDisabled => f.write_str("short entries disabled"),
            Veto::ZeroSize => f.write_str("position size is zero"),
        }
    }
}

/// Win/loss statistics used by Kelly sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    /// Average loss magnitude (positive).
    pub avg_loss: f64,
}

impl TradeStats {
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).collect();
        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        Self {
            trades: trades.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: if trades.is_empty() {
                0.0
            } else {
                wins.len() as f64 / trades.len() as f64
            },
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
        }
    }
}

/// Quote amount put at risk: `capital * risk_pct`.
pub fn risk_amount(capital: f64, risk_pct: f64) -> f64 {
    (capital * risk_pct).max(0.0)
}

/// Uncapped notional: `capital * risk_pct / stop_loss_pct`. Zero for a
/// non-positive stop.
pub fn raw_position_size(capital: f64, risk_pct: f64, stop_loss_pct: f64) -> f64 {
    if !(stop_loss_pct > 0.0) {
        return 0.0;
    }
    risk_amount(capital, risk_pct) / stop_loss_pct
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn initial_state(&self) -> RiskState {
        RiskState::new(self.config.capital)
    }

    fn exposure_cap(&self, capital: f64) -> f64 {
        (capital * self.config.max_exposure_pct).max(0.0)
    }

    /// Fixed-fractional notional, capped at `capital * max_exposure_pct`.
    pub fn position_size(&self, capital: f64, risk_pct: f64, stop_loss_pct: f64) -> f64 {
        raw_position_size(capital, risk_pct, stop_loss_pct).min(self.exposure_cap(capital))
    }

    /// Kelly fraction `w - (1 - w) / b` with `b = avg_win / avg_loss`,
    /// clamped to `[0, kelly_max_fraction]`. With no recorded losses the
    /// win rate itself is used.
    pub fn kelly_fraction(&self, win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
        let w = win_rate.clamp(0.0, 1.0);
        let raw = if avg_loss <= 0.0 {
            w
        } else if avg_win <= 0.0 {
            0.0
        } else {
            let b = avg_win / avg_loss;
            w - (1.0 - w) / b
        };
        if raw.is_nan() {
            return 0.0;
        }
        raw.clamp(0.0, self.config.kelly_max_fraction)
    }

    /// Kelly-based notional once enough trades are recorded, scaled down in
    /// volatile markets. Falls back to fixed-fractional sizing during warm-up.
    pub fn dynamic_position_size(
        &self,
        capital: f64,
        stats: &TradeStats,
        volatility_ratio: Option<f64>,
        stop_loss_pct: f64,
    ) -> f64 {
        if stats.trades < self.config.kelly_warmup_trades {
            return self.position_size(capital, self.config.risk_pct, stop_loss_pct);
        }
        let fraction = self.kelly_fraction(stats.win_rate, stats.avg_win, stats.avg_loss);
        let vol = volatility_ratio.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0);
        let scale = 1.0 / (1.0 + vol / self.config.volatility_reference);
        (capital * fraction * scale).min(self.exposure_cap(capital)).max(0.0)
    }

    /// Stop distance as a fraction of entry: `min(max(base, k * ATR / entry), max_stop)`.
    pub fn adaptive_stop_loss(&self, entry_price: f64, atr: Option<f64>, base_pct: f64) -> f64 {
        let atr_pct = match atr {
            Some(atr) if entry_price > 0.0 && atr.is_finite() && atr > 0.0 => {
                atr / entry_price * self.config.atr_stop_multiplier
            }
            _ => 0.0,
        };
        base_pct.max(atr_pct).min(self.config.max_stop_loss_pct)
    }

    /// Take-profit distance honouring the minimum reward/risk ratio.
    pub fn take_profit_pct(&self, stop_loss_pct: f64, proposed_pct: f64) -> f64 {
        proposed_pct
            .max(self.config.base_take_profit_pct)
            .max(stop_loss_pct * self.config.min_reward_risk)
    }

    /// Mark capital, move the peak, and apply the pause/resume hysteresis.
    pub fn update_drawdown(&self, state: &RiskState, capital: f64) -> RiskState {
        let peak = state.peak_capital.max(capital);
        let drawdown = if peak > 0.0 {
            (1.0 - capital / peak).max(0.0)
        } else {
            0.0
        };
        let paused = if drawdown > self.config.drawdown_pause_pct {
            true
        } else if drawdown < self.config.drawdown_resume_pct {
            false
        } else {
            state.drawdown_paused
        };
        RiskState {
            capital,
            peak_capital: peak,
            drawdown_pct: drawdown,
            drawdown_paused: paused,
            ..state.clone()
        }
    }

    /// Roll the day if needed and recompute the day's net realized loss from
    /// trades closed on `now`'s UTC date. Trades from other days are ignored.
    /// Once hit, the limit stays hit until the day changes.
    pub fn check_daily_limits(
        &self,
        state: &RiskState,
        trades_today: &[TradeRecord],
        now: DateTime<Utc>,
    ) -> RiskState {
        let today = now.date_naive();
        let mut next = state.clone();
        if next.day != Some(today) {
            next.day = Some(today);
            next.day_start_capital = state.capital;
            next.daily_loss = 0.0;
            next.daily_limit_hit = false;
        }

        let net: f64 = trades_today
            .iter()
            .filter(|t| t.closed_at.date_naive() == today)
            .map(|t| t.pnl)
            .sum();
        next.daily_loss = (-net).max(0.0);
        let breach = next.day_start_capital > 0.0
            && next.daily_loss / next.day_start_capital >= self.config.max_daily_loss_pct;
        next.daily_limit_hit = next.daily_limit_hit || breach;
        next
    }

    /// Book a closed trade: capital moves by its PnL and drawdown is re-marked.
    pub fn record_trade(&self, state: &RiskState, trade: &TradeRecord) -> RiskState {
        let mut next = self.update_drawdown(state, state.capital + trade.pnl);
        next.trades_completed += 1;
        next
    }

    /// Gate an entry. No side effects.
    pub fn approve(&self, state: &RiskState, confidence: f64) -> Result<(), Veto> {
        if state.drawdown_paused {
            return Err(Veto::DrawdownPaused);
        }
        if state.daily_limit_hit {
            return Err(Veto::DailyLimitHit);
        }
        if confidence < self.config.confidence_threshold {
            return Err(Veto::LowConfidence {
                confidence,
                threshold: self.config.confidence_threshold,
            });
        }
        Ok(())
    }
}
