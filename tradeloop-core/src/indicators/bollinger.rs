//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! Three bands (separate Indicator instances):
//! - Middle: SMA(close, period)
//! - Upper: middle + mult * stddev(close, period)
//! - Lower: middle - mult * stddev(close, period)
//!
//! Uses population stddev (divide by N).
//! Lookback: period - 1.

use super::Indicator;
use crate::domain::Candle;

/// Which band of the Bollinger Bands to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64, band: BollingerBand) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        let label = match band {
            BollingerBand::Upper => "upper",
            BollingerBand::Middle => "middle",
            BollingerBand::Lower => "lower",
        };
        Self {
            period,
            multiplier,
            band,
            name: format!("bollinger_{label}_{period}_{multiplier}"),
        }
    }

    pub fn upper(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Upper)
    }

    pub fn middle(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Middle)
    }

    pub fn lower(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Lower)
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let n = candles.len();
        let mut result = vec![f64::NAN; n];

        if n < self.period {
            return result;
        }

        for i in (self.period - 1)..n {
            let window = &candles[i + 1 - self.period..=i];
            if window.iter().any(|c| c.close.is_nan()) {
                continue;
            }
            let mean = window.iter().map(|c| c.close).sum::<f64>() / self.period as f64;
            if self.band == BollingerBand::Middle {
                result[i] = mean;
                continue;
            }
            let variance = window
                .iter()
                .map(|c| (c.close - mean).powi(2))
                .sum::<f64>()
                / self.period as f64;
            let offset = self.multiplier * variance.sqrt();
            result[i] = match self.band {
                BollingerBand::Upper => mean + offset,
                _ => mean - offset,
            };
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn bands_around_known_window() {
        // Window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population std 2
        let candles = make_candles(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let upper = Bollinger::upper(8, 2.0).compute(&candles);
        let middle = Bollinger::middle(8, 2.0).compute(&candles);
        let lower = Bollinger::lower(8, 2.0).compute(&candles);
        assert_approx(middle[7], 5.0, DEFAULT_EPSILON);
        assert_approx(upper[7], 9.0, DEFAULT_EPSILON);
        assert_approx(lower[7], 1.0, DEFAULT_EPSILON);
        assert!(upper[6].is_nan());
    }

    #[test]
    fn flat_series_collapses_bands() {
        let candles = make_candles(&[50.0; 5]);
        let upper = Bollinger::upper(3, 2.0).compute(&candles);
        let lower = Bollinger::lower(3, 2.0).compute(&candles);
        assert_approx(upper[4], 50.0, DEFAULT_EPSILON);
        assert_approx(lower[4], 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn band_names() {
        assert_eq!(Bollinger::upper(20, 2.0).name(), "bollinger_upper_20_2");
        assert_eq!(Bollinger::lower(20, 2.0).lookback(), 19);
    }
}
