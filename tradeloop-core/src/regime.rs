//! Market regime classification.
//!
//! Three inputs are composed:
//! - trend agreement across timeframes: (bullish - bearish) / total, in [-1, 1]
//! - ADX magnitude against `adx_threshold` (trend) and `strong_adx` (strong trend)
//! - volatility ratio ATR / close against `volatility_ceiling`
//!
//! Decision table, first match wins:
//!
//! | condition                                              | regime                 |
//! |--------------------------------------------------------|------------------------|
//! | volatility ratio > ceiling                             | Volatile (avoid)       |
//! | ADX >= threshold, agreement > 0                        | TrendingUp{Strong,Weak}|
//! | ADX >= threshold, agreement < 0                        | TrendingDown{…}        |
//! | otherwise (ADX low or unavailable, or no agreement)    | Ranging                |
//!
//! A trend is strong when ADX >= `strong_adx` and every timeframe agrees.

use serde::{Deserialize, Serialize};

use crate::domain::clamp_unit;
use crate::indicators::IndicatorSnapshot;
use crate::timeframe::{Bias, TimeframeSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendingUpStrong,
    TrendingUpWeak,
    TrendingDownStrong,
    TrendingDownWeak,
    Ranging,
    Volatile,
}

/// Strategy family recommended for a regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    Momentum,
    MeanReversion,
    Avoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAnalysis {
    pub regime: Regime,
    pub confidence: f64,
    pub trend_agreement: f64,
    /// ATR / close, when available.
    pub volatility_ratio: Option<f64>,
    pub recommendation: StrategyFamily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub adx_threshold: f64,
    pub strong_adx: f64,
    /// ATR / close above this is VOLATILE.
    pub volatility_ceiling: f64,
    /// A weak downtrend is traded with mean reversion while volatility stays
    /// below this fraction of the ceiling.
    pub calm_fraction: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_threshold: 20.0,
            strong_adx: 30.0,
            volatility_ceiling: 0.03,
            calm_fraction: 0.5,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.adx_threshold > 0.0) {
            problems.push("regime.adx_threshold must be > 0".into());
        }
        if !(self.strong_adx > self.adx_threshold) {
            problems.push("regime.strong_adx must exceed adx_threshold".into());
        }
        if !(self.volatility_ceiling > 0.0) {
            problems.push("regime.volatility_ceiling must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.calm_fraction) {
            problems.push("regime.calm_fraction must be in [0, 1]".into());
        }
        problems
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn classify(
        &self,
        indicators: &IndicatorSnapshot,
        summaries: &[TimeframeSummary],
    ) -> RegimeAnalysis {
        let cfg = &self.config;
        let agreement = trend_agreement(summaries);
        let volatility_ratio = indicators.volatility_ratio();

        if let Some(vol) = volatility_ratio {
            if vol > cfg.volatility_ceiling {
                return RegimeAnalysis {
                    regime: Regime::Volatile,
                    confidence: clamp_unit(0.5 + (vol - cfg.volatility_ceiling) / cfg.volatility_ceiling),
                    trend_agreement: agreement,
                    volatility_ratio,
                    recommendation: StrategyFamily::Avoid,
                };
            }
        }

        let trending = indicators
            .adx
            .map(|adx| adx >= cfg.adx_threshold && agreement != 0.0)
            .unwrap_or(false);

        let (regime, confidence) = match indicators.adx {
            Some(adx) if trending => {
                let strong = adx >= cfg.strong_adx && agreement.abs() >= 1.0;
                let regime = match (agreement > 0.0, strong) {
                    (true, true) => Regime::TrendingUpStrong,
                    (true, false) => Regime::TrendingUpWeak,
                    (false, true) => Regime::TrendingDownStrong,
                    (false, false) => Regime::TrendingDownWeak,
                };
                let adx_term =
                    clamp_unit((adx - cfg.adx_threshold) / (cfg.strong_adx - cfg.adx_threshold));
                (regime, 0.6 * adx_term + 0.4 * agreement.abs())
            }
            adx => {
                let adx_term = adx
                    .map(|a| clamp_unit((cfg.adx_threshold - a) / cfg.adx_threshold))
                    .unwrap_or(0.5);
                (Regime::Ranging, 0.6 * adx_term + 0.4 * (1.0 - agreement.abs()))
            }
        };

        RegimeAnalysis {
            regime,
            confidence: clamp_unit(confidence),
            trend_agreement: agreement,
            volatility_ratio,
            recommendation: self.recommend(regime, volatility_ratio),
        }
    }

    fn recommend(&self, regime: Regime, volatility_ratio: Option<f64>) -> StrategyFamily {
        match regime {
            Regime::Volatile => StrategyFamily::Avoid,
            Regime::TrendingUpStrong | Regime::TrendingDownStrong | Regime::TrendingUpWeak => {
                StrategyFamily::Momentum
            }
            Regime::Ranging => StrategyFamily::MeanReversion,
            Regime::TrendingDownWeak => {
                let calm = volatility_ratio
                    .map(|v| v < self.config.calm_fraction * self.config.volatility_ceiling)
                    .unwrap_or(false);
                if calm {
                    StrategyFamily::MeanReversion
                } else {
                    StrategyFamily::Momentum
                }
            }
        }
    }
}

/// (bullish - bearish) / total over the timeframe summaries; 0 when empty.
pub fn trend_agreement(summaries: &[TimeframeSummary]) -> f64 {
    if summaries.is_empty() {
        return 0.0;
    }
    let bull = summaries.iter().filter(|s| s.bias == Bias::Bullish).count() as f64;
    let bear = summaries.iter().filter(|s| s.bias == Bias::Bearish).count() as f64;
    (bull - bear) / summaries.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(bias: Bias) -> TimeframeSummary {
        let trend_pct = match bias {
            Bias::Bullish => 1.0,
            Bias::Bearish => -1.0,
            Bias::Neutral => 0.0,
        };
        TimeframeSummary {
            interval: "5m".into(),
            trend_pct,
            bias,
            confidence: 0.5,
            close: 100.0,
            indicators: IndicatorSnapshot::default(),
        }
    }

    fn snapshot(adx: Option<f64>, atr: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: Some(100.0),
            adx,
            atr: Some(atr),
            ..Default::default()
        }
    }

    #[test]
    fn high_volatility_is_always_avoid() {
        let c = RegimeClassifier::default();
        let all_bull = vec![summary(Bias::Bullish); 3];
        let a = c.classify(&snapshot(Some(45.0), 5.0), &all_bull);
        assert_eq!(a.regime, Regime::Volatile);
        assert_eq!(a.recommendation, StrategyFamily::Avoid);
    }

    #[test]
    fn strong_uptrend_requires_full_agreement() {
        let c = RegimeClassifier::default();
        let all_bull = vec![summary(Bias::Bullish); 3];
        let a = c.classify(&snapshot(Some(35.0), 1.0), &all_bull);
        assert_eq!(a.regime, Regime::TrendingUpStrong);
        assert_eq!(a.recommendation, StrategyFamily::Momentum);
        assert!((a.trend_agreement - 1.0).abs() < 1e-12);

        let mixed = vec![summary(Bias::Bullish), summary(Bias::Bullish), summary(Bias::Neutral)];
        let a = c.classify(&snapshot(Some(35.0), 1.0), &mixed);
        assert_eq!(a.regime, Regime::TrendingUpWeak);
        assert_eq!(a.recommendation, StrategyFamily::Momentum);
    }

    #[test]
    fn weak_downtrend_in_calm_market_uses_mean_reversion() {
        let c = RegimeClassifier::default();
        let mixed = vec![summary(Bias::Bearish), summary(Bias::Neutral)];
        let calm = c.classify(&snapshot(Some(24.0), 1.0), &mixed);
        assert_eq!(calm.regime, Regime::TrendingDownWeak);
        assert_eq!(calm.recommendation, StrategyFamily::MeanReversion);

        let lively = c.classify(&snapshot(Some(24.0), 2.5), &mixed);
        assert_eq!(lively.regime, Regime::TrendingDownWeak);
        assert_eq!(lively.recommendation, StrategyFamily::Momentum);
    }

    #[test]
    fn low_adx_is_ranging() {
        let c = RegimeClassifier::default();
        let all_bull = vec![summary(Bias::Bullish); 3];
        let a = c.classify(&snapshot(Some(12.0), 1.0), &all_bull);
        assert_eq!(a.regime, Regime::Ranging);
        assert_eq!(a.recommendation, StrategyFamily::MeanReversion);
    }

    #[test]
    fn unavailable_adx_never_claims_a_trend() {
        let c = RegimeClassifier::default();
        let all_bull = vec![summary(Bias::Bullish); 3];
        let a = c.classify(&snapshot(None, 1.0), &all_bull);
        assert_eq!(a.regime, Regime::Ranging);
    }

    #[test]
    fn no_agreement_is_ranging_even_with_high_adx() {
        let c = RegimeClassifier::default();
        let split = vec![summary(Bias::Bullish), summary(Bias::Bearish)];
        let a = c.classify(&snapshot(Some(40.0), 1.0), &split);
        assert_eq!(a.regime, Regime::Ranging);
    }

    #[test]
    fn confidence_is_clamped() {
        let c = RegimeClassifier::default();
        let all_bear = vec![summary(Bias::Bearish); 3];
        let a = c.classify(&snapshot(Some(99.0), 0.5), &all_bear);
        assert_eq!(a.regime, Regime::TrendingDownStrong);
        assert!((0.0..=1.0).contains(&a.confidence));
        assert!((a.confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn agreement_of_empty_is_zero() {
        assert_eq!(trend_agreement(&[]), 0.0);
    }
}
