//! ADX: Average Directional Index (Wilder), with the +DI / -DI lines.
//!
//! Steps:
//! 1. +DM and -DM from consecutive candles
//! 2. Wilder-smooth +DM, -DM and TR
//! 3. +DI = 100 * smoothed(+DM) / smoothed(TR), -DI likewise
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = Wilder-smoothed DX
//!
//! Lookback: 2 * period for ADX, period for the DI lines.

use super::atr::{true_range, wilder_smooth};
use super::Indicator;
use crate::domain::Candle;

/// Which output line of the directional movement system to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdxLine {
    Adx,
    PlusDi,
    MinusDi,
}

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    line: AdxLine,
    name: String,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self::line(period, AdxLine::Adx)
    }

    pub fn plus_di(period: usize) -> Self {
        Self::line(period, AdxLine::PlusDi)
    }

    pub fn minus_di(period: usize) -> Self {
        Self::line(period, AdxLine::MinusDi)
    }

    fn line(period: usize, line: AdxLine) -> Self {
        assert!(period >= 1, "ADX period must be >= 1");
        let prefix = match line {
            AdxLine::Adx => "adx",
            AdxLine::PlusDi => "plus_di",
            AdxLine::MinusDi => "minus_di",
        };
        Self {
            period,
            line,
            name: format!("{prefix}_{period}"),
        }
    }
}

impl Indicator for Adx {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.line {
            AdxLine::Adx => 2 * self.period,
            AdxLine::PlusDi | AdxLine::MinusDi => self.period,
        }
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let dm = directional_movement(candles, self.period);
        match self.line {
            AdxLine::Adx => dm.adx,
            AdxLine::PlusDi => dm.plus_di,
            AdxLine::MinusDi => dm.minus_di,
        }
    }
}

/// All three series of the directional movement system.
#[derive(Debug, Clone)]
pub struct DirectionalMovement {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

pub fn directional_movement(candles: &[Candle], period: usize) -> DirectionalMovement {
    let n = candles.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];

    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        if up.is_nan() || down.is_nan() {
            continue;
        }
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let mut tr = true_range(candles);
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    let smooth_tr = wilder_smooth(&tr, period);
    let smooth_plus = wilder_smooth(&plus_dm, period);
    let smooth_minus = wilder_smooth(&minus_dm, period);

    let mut plus_di = vec![f64::NAN; n];
    let mut minus_di = vec![f64::NAN; n];
    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        if smooth_tr[i].is_nan()
            || smooth_plus[i].is_nan()
            || smooth_minus[i].is_nan()
            || smooth_tr[i] == 0.0
        {
            continue;
        }
        let p = 100.0 * smooth_plus[i] / smooth_tr[i];
        let m = 100.0 * smooth_minus[i] / smooth_tr[i];
        plus_di[i] = p;
        minus_di[i] = m;
        dx[i] = if p + m == 0.0 {
            0.0
        } else {
            100.0 * (p - m).abs() / (p + m)
        };
    }

    DirectionalMovement {
        plus_di,
        minus_di,
        adx: wilder_smooth(&dx, period),
    }
}
