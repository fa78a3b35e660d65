//! Engine configuration: one section per component.
//!
//! Every section derives serde with `#[serde(default)]`, so a partial TOML or
//! JSON document fills the rest from defaults. `validate` collects every
//! problem instead of stopping at the first.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fusion::FusionConfig;
use crate::indicators::IndicatorParams;
use crate::lifecycle::LifecycleConfig;
use crate::patterns::PatternConfig;
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::strategy::StrategyConfig;
use crate::timeframe::TimeframeConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskConfig,
    pub fusion: FusionConfig,
    pub regime: RegimeConfig,
    pub strategy: StrategyConfig,
    pub indicators: IndicatorParams,
    pub patterns: PatternConfig,
    pub timeframes: TimeframeConfig,
    pub lifecycle: LifecycleConfig,
}

impl EngineConfig {
    /// Check every section plus the cross-section rules.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut problems = Vec::new();
        problems.extend(self.risk.validate());
        problems.extend(self.fusion.validate());
        problems.extend(self.regime.validate());
        problems.extend(self.strategy.validate());
        problems.extend(self.indicators.validate());
        problems.extend(self.timeframes.validate());
        problems.extend(self.lifecycle.validate());

        if self.fusion.high_risk_cap >= self.risk.confidence_threshold {
            problems.push(format!(
                "fusion.high_risk_cap ({}) must be below risk.confidence_threshold ({})",
                self.fusion.high_risk_cap, self.risk.confidence_threshold
            ));
        }
        if self.patterns.lookback > self.timeframes.candle_limit {
            problems.push("patterns.lookback must not exceed timeframes.candle_limit".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigValidation(problems))
        }
    }

    /// BLAKE3 hash of the serialized config, logged at startup so runs can be
    /// matched to the exact parameters they used.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }
}
