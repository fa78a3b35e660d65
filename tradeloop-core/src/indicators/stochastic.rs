//! Stochastic oscillator.
//!
//! %K = 100 * (close - lowest_low(k)) / (highest_high(k) - lowest_low(k))
//! %D = SMA(%K, d)
//! A flat window (highest == lowest) gives %K = 50.
//! Lookback: k - 1 for %K, k + d - 2 for %D.

use super::sma::sma_of_series;
use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StochasticLine {
    K,
    D,
}

#[derive(Debug, Clone)]
pub struct Stochastic {
    k_period: usize,
    d_period: usize,
    line: StochasticLine,
    name: String,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize, line: StochasticLine) -> Self {
        assert!(k_period >= 1 && d_period >= 1, "Stochastic periods must be >= 1");
        let label = match line {
            StochasticLine::K => "stoch_k",
            StochasticLine::D => "stoch_d",
        };
        Self {
            k_period,
            d_period,
            line,
            name: format!("{label}_{k_period}_{d_period}"),
        }
    }
}

impl Indicator for Stochastic {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.line {
            StochasticLine::K => self.k_period - 1,
            StochasticLine::D => self.k_period + self.d_period - 2,
        }
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let k = percent_k(candles, self.k_period);
        match self.line {
            StochasticLine::K => k,
            StochasticLine::D => sma_of_series(&k, self.d_period),
        }
    }
}

pub fn percent_k(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &candles[i + 1 - period..=i];
        if window.iter().any(|c| c.is_void()) {
            continue;
        }
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        result[i] = if range == 0.0 {
            50.0
        } else {
            100.0 * (candles[i].close - lowest) / range
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_ohlc_candles, DEFAULT_EPSILON};

    #[test]
    fn close_at_top_of_range_is_100() {
        let candles = make_ohlc_candles(&[
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 15.0, 11.0, 15.0),
        ]);
        let k = Stochastic::new(3, 1, StochasticLine::K).compute(&candles);
        assert_approx(k[2], 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn d_is_average_of_k() {
        let candles = make_ohlc_candles(&[
            (10.0, 12.0, 8.0, 10.0),  // K(2) n/a
            (10.0, 12.0, 8.0, 12.0),  // K = (12-8)/(12-8) = 100
            (12.0, 12.0, 8.0, 8.0),   // K = 0
            (8.0, 12.0, 8.0, 10.0),   // K = 50
        ]);
        let d = Stochastic::new(2, 2, StochasticLine::D).compute(&candles);
        assert!(d[1].is_nan());
        assert_approx(d[2], 50.0, DEFAULT_EPSILON);
        assert_approx(d[3], 25.0, DEFAULT_EPSILON);
    }

    #[test]
    fn flat_window_is_neutral() {
        let candles = make_ohlc_candles(&[(5.0, 5.0, 5.0, 5.0); 4]);
        let k = percent_k(&candles, 3);
        assert_approx(k[3], 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn lookbacks() {
        assert_eq!(Stochastic::new(14, 3, StochasticLine::K).lookback(), 13);
        assert_eq!(Stochastic::new(14, 3, StochasticLine::D).lookback(), 15);
    }
}
