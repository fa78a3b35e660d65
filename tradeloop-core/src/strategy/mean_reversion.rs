//! Mean reversion: fade stretched prices back toward the mean.
//!
//! Additive score, positive favours BUY:
//!
//! | evidence                                 | score        |
//! |------------------------------------------|--------------|
//! | Bollinger position < 0.2 / < 0.3         | +1.5 / +1.0  |
//! | Bollinger position > 0.8 / > 0.7         | -1.5 / -1.0  |
//! | RSI < 30 / < 35                          | +0.8 / +0.5  |
//! | RSI > 70 / > 65                          | -0.8 / -0.5  |
//! | close within 2% above support            | +1.0         |
//! | close within 2% below resistance         | -1.0         |
//! | stochastic %K < 20 / > 80                | +0.5 / -0.5  |
//! | MACD crossing up below zero / down above | +0.6 / -0.6  |
//!
//! |score| >= `entry_score` produces a signal with confidence
//! `min(|score| / 4, 0.9)`.

use serde::{Deserialize, Serialize};

use super::{insufficient_indicators, SignalGenerator};
use crate::domain::{Action, Candle, Signal};
use crate::indicators::IndicatorSnapshot;
use crate::patterns::PatternReport;
use crate::timeframe::TimeframeSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    /// Distance from support/resistance, as a fraction of price, that counts as "near".
    pub level_proximity_pct: f64,
    pub entry_score: f64,
    pub max_confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            level_proximity_pct: 0.02,
            entry_score: 1.5,
            max_confidence: 0.9,
            stop_loss_pct: 0.008,
            take_profit_pct: 0.012,
        }
    }
}

impl MeanReversionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.level_proximity_pct > 0.0) {
            problems.push("strategy.mean_reversion.level_proximity_pct must be > 0".into());
        }
        if !(self.entry_score > 0.0) {
            problems.push("strategy.mean_reversion.entry_score must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.max_confidence) {
            problems.push("strategy.mean_reversion.max_confidence must be in [0, 1]".into());
        }
        if !(self.stop_loss_pct > 0.0 && self.take_profit_pct > 0.0) {
            problems.push("strategy.mean_reversion stop/take-profit must be > 0".into());
        }
        problems
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
    min_available: usize,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig, min_available: usize) -> Self {
        Self {
            config,
            min_available,
        }
    }

    /// Score and the reasons behind it.
    pub fn score(&self, ind: &IndicatorSnapshot, patterns: &PatternReport) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        if let Some(pos) = ind.bollinger_position() {
            let delta = if pos < 0.2 {
                1.5
            } else if pos < 0.3 {
                1.0
            } else if pos > 0.8 {
                -1.5
            } else if pos > 0.7 {
                -1.0
            } else {
                0.0
            };
            if delta != 0.0 {
                score += delta;
                reasons.push(format!("Bollinger position {pos:.2}"));
            }
        }

        if let Some(rsi) = ind.rsi {
            let delta = if rsi < 30.0 {
                0.8
            } else if rsi < 35.0 {
                0.5
            } else if rsi > 70.0 {
                -0.8
            } else if rsi > 65.0 {
                -0.5
            } else {
                0.0
            };
            if delta != 0.0 {
                score += delta;
                reasons.push(format!("RSI {rsi:.1}"));
            }
        }

        if let Some(close) = ind.close {
            let near = self.config.level_proximity_pct;
            if let Some(support) = patterns.support.filter(|s| *s > 0.0) {
                let distance = (close - support) / support;
                if (0.0..=near).contains(&distance) {
                    score += 1.0;
                    reasons.push(format!("near support {support:.2}"));
                }
            }
            if let Some(resistance) = patterns.resistance.filter(|r| *r > 0.0) {
                let distance = (resistance - close) / resistance;
                if (0.0..=near).contains(&distance) {
                    score -= 1.0;
                    reasons.push(format!("near resistance {resistance:.2}"));
                }
            }
        }

        if let Some(k) = ind.stochastic_k {
            if k < 20.0 {
                score += 0.5;
                reasons.push(format!("stochastic %K {k:.1} oversold"));
            } else if k > 80.0 {
                score -= 0.5;
                reasons.push(format!("stochastic %K {k:.1} overbought"));
            }
        }

        if let (Some(macd), Some(signal)) = (ind.macd, ind.macd_signal) {
            if macd > signal && macd < 0.0 {
                score += 0.6;
                reasons.push("MACD turning up below zero".into());
            } else if macd < signal && macd > 0.0 {
                score -= 0.6;
                reasons.push("MACD turning down above zero".into());
            }
        }

        (score, reasons)
    }
}

impl SignalGenerator for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn generate(
        &self,
        _candles: &[Candle],
        ind: &IndicatorSnapshot,
        patterns: &PatternReport,
        _summaries: &[TimeframeSummary],
    ) -> Signal {
        if let Some(hold) = insufficient_indicators(ind, self.min_available) {
            return hold;
        }
        let cfg = &self.config;
        let (score, reasons) = self.score(ind, patterns);
        if score.abs() < cfg.entry_score {
            return Signal::hold(format!("mean reversion score {score:+.2} below entry"));
        }
        let action = if score > 0.0 { Action::Buy } else { Action::Sell };
        Signal::new(
            action,
            (score.abs() / 4.0).min(cfg.max_confidence),
            reasons,
            cfg.stop_loss_pct,
            cfg.take_profit_pct,
        )
    }
}
