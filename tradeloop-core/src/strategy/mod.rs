//! Strategy signal generators.
//!
//! Two interchangeable generators share the [`SignalGenerator`] contract.
//! [`Strategy`] is the tagged variant the regime recommendation selects; the
//! generators never see portfolio or risk state.

pub mod mean_reversion;
pub mod momentum;

pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use momentum::{MomentumConfig, MomentumStrategy};

use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Signal};
use crate::indicators::IndicatorSnapshot;
use crate::patterns::PatternReport;
use crate::regime::{Regime, RegimeAnalysis, StrategyFamily};
use crate::timeframe::TimeframeSummary;

/// Trait for technical signal generators.
pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a directional signal. Returns HOLD with confidence 0 when too
    /// few indicators are available.
    fn generate(
        &self,
        candles: &[Candle],
        indicators: &IndicatorSnapshot,
        patterns: &PatternReport,
        summaries: &[TimeframeSummary],
    ) -> Signal;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Minimum number of indicator families (of six) that must be available.
    pub min_available_indicators: usize,
    pub momentum: MomentumConfig,
    pub mean_reversion: MeanReversionConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_available_indicators: 4,
            momentum: MomentumConfig::default(),
            mean_reversion: MeanReversionConfig::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.min_available_indicators > 6 {
            problems.push("strategy.min_available_indicators must be <= 6".into());
        }
        problems.extend(self.momentum.validate());
        problems.extend(self.mean_reversion.validate());
        problems
    }
}

/// The generator chosen for the current regime.
#[derive(Debug, Clone)]
pub enum Strategy {
    Momentum(MomentumStrategy),
    MeanReversion(MeanReversionStrategy),
}

impl Strategy {
    /// Pick the generator recommended by the regime. `None` for `Avoid`.
    ///
    /// Mean reversion is only eligible in ranging or weak-downtrend regimes;
    /// any other mean-reversion recommendation falls back to momentum.
    pub fn for_regime(analysis: &RegimeAnalysis, config: &StrategyConfig) -> Option<Strategy> {
        let min = config.min_available_indicators;
        match analysis.recommendation {
            StrategyFamily::Avoid => None,
            StrategyFamily::MeanReversion
                if matches!(analysis.regime, Regime::Ranging | Regime::TrendingDownWeak) =>
            {
                Some(Strategy::MeanReversion(MeanReversionStrategy::new(
                    config.mean_reversion.clone(),
                    min,
                )))
            }
            StrategyFamily::MeanReversion | StrategyFamily::Momentum => Some(
                Strategy::Momentum(MomentumStrategy::new(config.momentum.clone(), min)),
            ),
        }
    }

    pub fn family(&self) -> StrategyFamily {
        match self {
            Strategy::Momentum(_) => StrategyFamily::Momentum,
            Strategy::MeanReversion(_) => StrategyFamily::MeanReversion,
        }
    }
}

impl SignalGenerator for Strategy {
    fn name(&self) -> &str {
        match self {
            Strategy::Momentum(s) => s.name(),
            Strategy::MeanReversion(s) => s.name(),
        }
    }

    fn generate(
        &self,
        candles: &[Candle],
        indicators: &IndicatorSnapshot,
        patterns: &PatternReport,
        summaries: &[TimeframeSummary],
    ) -> Signal {
        match self {
            Strategy::Momentum(s) => s.generate(candles, indicators, patterns, summaries),
            Strategy::MeanReversion(s) => s.generate(candles, indicators, patterns, summaries),
        }
    }
}

/// HOLD when fewer than `min` indicator families are available.
pub(crate) fn insufficient_indicators(indicators: &IndicatorSnapshot, min: usize) -> Option<Signal> {
    let available = indicators.available_count();
    (available < min).then(|| {
        Signal::hold(format!(
            "only {available} of {min} required indicators available"
        ))
    })
}

#[cfg(test)]
pub(crate) fn full_snapshot() -> IndicatorSnapshot {
    IndicatorSnapshot {
        close: Some(100.0),
        rsi: Some(50.0),
        macd: Some(0.0),
        macd_signal: Some(0.0),
        macd_histogram: Some(0.0),
        bollinger_upper: Some(104.0),
        bollinger_middle: Some(100.0),
        bollinger_lower: Some(96.0),
        atr: Some(1.0),
        adx: Some(15.0),
        plus_di: Some(20.0),
        minus_di: Some(20.0),
        stochastic_k: Some(50.0),
        stochastic_d: Some(50.0),
    }
}
