//! Candlestick and support/resistance pattern recognition.
//!
//! Rules, all evaluated on the most recent candles:
//! - Doji: body / range < `doji_body_ratio` (0.1). Reported as both bullish and bearish.
//! - Hammer: lower shadow > 2 * body and upper shadow < 0.5 * body. Bullish when
//!   the candle closes up, otherwise reported as a bearish hanging man.
//! - Engulfing: previous and current candles of opposite colour, with the
//!   current body fully containing the previous body.
//! - Support / resistance: lowest low / highest high of the trailing `lookback` window.
//! - RSI divergence: the last close moves against the last RSI step.
//!
//! Fewer than `min_candles` candles yields an empty report.

use serde::{Deserialize, Serialize};

use crate::domain::Candle;
use crate::indicators::rsi::rsi_of_series;

pub const DOJI: &str = "Doji";
pub const BULLISH_HAMMER: &str = "Bullish Hammer";
pub const HANGING_MAN: &str = "Bearish Hanging Man";
pub const BULLISH_ENGULFING: &str = "Bullish Engulfing";
pub const BEARISH_ENGULFING: &str = "Bearish Engulfing";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    pub bullish: Vec<String>,
    pub bearish: Vec<String>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub bullish_divergence: bool,
    pub bearish_divergence: bool,
}

impl PatternReport {
    /// Net pattern bias: bullish count minus bearish count, divergences included.
    pub fn net_bias(&self) -> i32 {
        let bull = self.bullish.len() as i32 + i32::from(self.bullish_divergence);
        let bear = self.bearish.len() as i32 + i32::from(self.bearish_divergence);
        bull - bear
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Support/resistance window.
    pub lookback: usize,
    pub min_candles: usize,
    pub rsi_period: usize,
    pub doji_body_ratio: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            min_candles: 30,
            rsi_period: 14,
            doji_body_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternRecognizer {
    config: PatternConfig,
}

impl PatternRecognizer {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, candles: &[Candle]) -> PatternReport {
        let mut report = PatternReport::default();
        if candles.len() < self.config.min_candles.max(2) {
            return report;
        }

        let last = &candles[candles.len() - 1];
        let prev = &candles[candles.len() - 2];

        if is_doji(last, self.config.doji_body_ratio) {
            report.bullish.push(DOJI.into());
            report.bearish.push(DOJI.into());
        }

        match hammer(last) {
            Some(true) => report.bullish.push(BULLISH_HAMMER.into()),
            Some(false) => report.bearish.push(HANGING_MAN.into()),
            None => {}
        }

        match engulfing(prev, last) {
            Some(true) => report.bullish.push(BULLISH_ENGULFING.into()),
            Some(false) => report.bearish.push(BEARISH_ENGULFING.into()),
            None => {}
        }

        if let Some((support, resistance)) = support_resistance(candles, self.config.lookback) {
            report.support = Some(support);
            report.resistance = Some(resistance);
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi = rsi_of_series(&closes, self.config.rsi_period);
        let (bull_div, bear_div) = divergence(&closes, &rsi);
        report.bullish_divergence = bull_div;
        report.bearish_divergence = bear_div;

        report
    }
}

fn is_doji(c: &Candle, max_body_ratio: f64) -> bool {
    let range = c.range();
    range > 0.0 && c.body() / range < max_body_ratio
}

/// `Some(true)` for a bullish hammer, `Some(false)` for a hanging man.
fn hammer(c: &Candle) -> Option<bool> {
    let body = c.body();
    if body == 0.0 {
        return None;
    }
    (c.lower_shadow() > 2.0 * body && c.upper_shadow() < 0.5 * body).then(|| c.is_bullish())
}

/// `Some(true)` for bullish engulfing, `Some(false)` for bearish.
fn engulfing(prev: &Candle, curr: &Candle) -> Option<bool> {
    if curr.is_bullish() && prev.is_bearish() && curr.close > prev.open && curr.open < prev.close
    {
        return Some(true);
    }
    if curr.is_bearish() && prev.is_bullish() && curr.close < prev.open && curr.open > prev.close
    {
        return Some(false);
    }
    None
}

fn support_resistance(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || candles.len() < lookback {
        return None;
    }
    let window = &candles[candles.len() - lookback..];
    let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    (support.is_finite() && resistance.is_finite()).then_some((support, resistance))
}

fn divergence(closes: &[f64], rsi: &[f64]) -> (bool, bool) {
    let n = closes.len();
    if n < 5 || rsi.len() < 5 {
        return (false, false);
    }
    let (p1, p0) = (closes[n - 2], closes[n - 1]);
    let (r1, r0) = (rsi[n - 2], rsi[n - 1]);
    if r1.is_nan() || r0.is_nan() {
        return (false, false);
    }
    (p0 < p1 && r0 > r1, p0 > p1 && r0 < r1)
}
