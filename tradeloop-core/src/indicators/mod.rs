//! Indicator engine.
//!
//! Every indicator implements [`Indicator`]: candle history in, a numeric
//! series of the same length out, NaN through warm-up. Multi-line indicators
//! (MACD, Bollinger, Stochastic, ADX/DI) are exposed as separate named
//! instances per line, keeping the single-series trait unchanged.
//!
//! [`IndicatorSet`] holds one instance per snapshot field and reads the latest
//! value of each series into an [`IndicatorSnapshot`]. Warm-up or non-finite
//! values become `None`, which callers treat as "no opinion", never as zero.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stochastic;

pub use adx::{directional_movement, Adx, AdxLine, DirectionalMovement};
pub use atr::Atr;
pub use bollinger::{Bollinger, BollingerBand};
pub use ema::ema_of_series;
pub use macd::{macd_lines, Macd, MacdLine};
pub use rsi::Rsi;
pub use sma::sma_of_series;
pub use stochastic::{Stochastic, StochasticLine};

use serde::{Deserialize, Serialize};

use crate::domain::Candle;

/// Trait for indicators.
///
/// # Look-ahead guard
/// No value at index t may depend on candles after t. Computing over a
/// truncated series must reproduce the prefix of the full series.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "rsi_14", "atr_14").
    fn name(&self) -> &str;

    /// Number of candles needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the whole candle series.
    fn compute(&self, candles: &[Candle]) -> Vec<f64>;
}

/// Periods used by [`compute_snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
    pub atr_period: usize,
    pub adx_period: usize,
    pub stochastic_k: usize,
    pub stochastic_d: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
            atr_period: 14,
            adx_period: 14,
            stochastic_k: 14,
            stochastic_d: 3,
        }
    }
}

impl IndicatorParams {
    /// Candles needed for every indicator in the snapshot to be available.
    pub fn warmup(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bollinger_period,
            self.atr_period + 1,
            2 * self.adx_period + 1,
            self.stochastic_k + self.stochastic_d - 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
            ("atr_period", self.atr_period),
            ("adx_period", self.adx_period),
            ("stochastic_k", self.stochastic_k),
            ("stochastic_d", self.stochastic_d),
        ];
        for (name, value) in periods {
            if value == 0 {
                problems.push(format!("indicators.{name} must be >= 1"));
            }
        }
        if self.macd_fast >= self.macd_slow {
            problems.push("indicators.macd_fast must be shorter than macd_slow".into());
        }
        if !(self.bollinger_multiplier > 0.0) {
            problems.push("indicators.bollinger_multiplier must be > 0".into());
        }
        problems
    }
}

/// Latest indicator values. `None` means unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
}

impl IndicatorSnapshot {
    /// Number of indicator families with a usable value
    /// (RSI, MACD, Bollinger, ATR, ADX, Stochastic).
    pub fn available_count(&self) -> usize {
        [
            self.rsi.is_some(),
            self.macd.is_some() && self.macd_signal.is_some(),
            self.bollinger_upper.is_some()
                && self.bollinger_middle.is_some()
                && self.bollinger_lower.is_some(),
            self.atr.is_some(),
            self.adx.is_some(),
            self.stochastic_k.is_some(),
        ]
        .iter()
        .filter(|&&ok| ok)
        .count()
    }

    /// Position of the close within the Bollinger bands: 0 at the lower band,
    /// 1 at the upper band. `None` if bands are unavailable or collapsed.
    pub fn bollinger_position(&self) -> Option<f64> {
        let (close, upper, lower) = (self.close?, self.bollinger_upper?, self.bollinger_lower?);
        let width = upper - lower;
        if width <= 0.0 {
            return None;
        }
        Some((close - lower) / width)
    }

    /// ATR as a fraction of the close.
    pub fn volatility_ratio(&self) -> Option<f64> {
        let (atr, close) = (self.atr?, self.close?);
        if close <= 0.0 {
            return None;
        }
        Some(atr / close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Rsi,
    Macd,
    MacdSignal,
    MacdHistogram,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
    Atr,
    Adx,
    PlusDi,
    MinusDi,
    StochasticK,
    StochasticD,
}

impl Field {
    fn slot(self, snap: &mut IndicatorSnapshot) -> &mut Option<f64> {
        match self {
            Field::Rsi => &mut snap.rsi,
            Field::Macd => &mut snap.macd,
            Field::MacdSignal => &mut snap.macd_signal,
            Field::MacdHistogram => &mut snap.macd_histogram,
            Field::BollingerUpper => &mut snap.bollinger_upper,
            Field::BollingerMiddle => &mut snap.bollinger_middle,
            Field::BollingerLower => &mut snap.bollinger_lower,
            Field::Atr => &mut snap.atr,
            Field::Adx => &mut snap.adx,
            Field::PlusDi => &mut snap.plus_di,
            Field::MinusDi => &mut snap.minus_di,
            Field::StochasticK => &mut snap.stochastic_k,
            Field::StochasticD => &mut snap.stochastic_d,
        }
    }
}

/// The indicators behind an [`IndicatorSnapshot`], one per field.
pub struct IndicatorSet {
    lines: Vec<(Field, Box<dyn Indicator>)>,
}

impl IndicatorSet {
    /// Build the set, or return the validation problems with `params`.
    pub fn new(params: &IndicatorParams) -> Result<Self, Vec<String>> {
        let problems = params.validate();
        if !problems.is_empty() {
            return Err(problems);
        }
        let p = params;
        let (fast, slow, signal) = (p.macd_fast, p.macd_slow, p.macd_signal);
        let lines: Vec<(Field, Box<dyn Indicator>)> = vec![
            (Field::Rsi, Box::new(Rsi::new(p.rsi_period))),
            (Field::Macd, Box::new(Macd::new(fast, slow, signal, MacdLine::Macd))),
            (Field::MacdSignal, Box::new(Macd::new(fast, slow, signal, MacdLine::Signal))),
            (Field::MacdHistogram, Box::new(Macd::new(fast, slow, signal, MacdLine::Histogram))),
            (
                Field::BollingerUpper,
                Box::new(Bollinger::upper(p.bollinger_period, p.bollinger_multiplier)),
            ),
            (
                Field::BollingerMiddle,
                Box::new(Bollinger::middle(p.bollinger_period, p.bollinger_multiplier)),
            ),
            (
                Field::BollingerLower,
                Box::new(Bollinger::lower(p.bollinger_period, p.bollinger_multiplier)),
            ),
            (Field::Atr, Box::new(Atr::new(p.atr_period))),
            (Field::Adx, Box::new(Adx::new(p.adx_period))),
            (Field::PlusDi, Box::new(Adx::plus_di(p.adx_period))),
            (Field::MinusDi, Box::new(Adx::minus_di(p.adx_period))),
            (
                Field::StochasticK,
                Box::new(Stochastic::new(p.stochastic_k, p.stochastic_d, StochasticLine::K)),
            ),
            (
                Field::StochasticD,
                Box::new(Stochastic::new(p.stochastic_k, p.stochastic_d, StochasticLine::D)),
            ),
        ];
        Ok(Self { lines })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(|(_, indicator)| indicator.name())
    }

    pub fn snapshot(&self, candles: &[Candle]) -> IndicatorSnapshot {
        let mut snap = IndicatorSnapshot {
            close: candles.last().map(|c| c.close).and_then(finite),
            ..IndicatorSnapshot::default()
        };
        for (field, indicator) in &self.lines {
            *field.slot(&mut snap) = last_finite(&indicator.compute(candles));
        }
        snap
    }
}

/// Compute the latest value of every indicator. Pure. Parameters that fail
/// validation leave every indicator unavailable.
pub fn compute_snapshot(candles: &[Candle], params: &IndicatorParams) -> IndicatorSnapshot {
    match IndicatorSet::new(params) {
        Ok(set) => set.snapshot(candles),
        Err(_) => IndicatorSnapshot::default(),
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Value at the last index, if finite. Earlier values are never substituted.
fn last_finite(series: &[f64]) -> Option<f64> {
    series.last().copied().and_then(finite)
}

/// Create synthetic one-minute candles from close prices for testing.
///
/// open = previous close (or close for the first candle),
/// high = max(open, close) + 1.0, low = min(open, close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                timestamp: test_time(i),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Create candles from explicit (open, high, low, close) tuples for testing.
#[cfg(test)]
pub fn make_ohlc_candles(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Candle {
            timestamp: test_time(i),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        })
        .collect()
}

#[cfg(test)]
fn test_time(i: usize) -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        + chrono::Duration::minutes(i as i64)
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
