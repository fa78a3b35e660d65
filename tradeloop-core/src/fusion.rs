//! Signal fusion: technical signal + external sentiment.
//!
//! ```text
//! support  = |score|  if the sentiment bias matches the technical action, else 0
//! fused    = tw * technical_confidence + sw * support
//! fused   -= penalty  if the sentiment bias opposes the technical action
//! fused    = min(fused, high_risk_cap)  if sentiment risk is HIGH
//! ```
//!
//! The technical action is never flipped by sentiment. Only the ambiguity
//! resolver may replace it, and only inside the ambiguous band.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{clamp_unit, Action, RiskLevel, SentimentReading, Signal};
use crate::ports::{AmbiguityContext, AmbiguityResolver};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub technical_weight: f64,
    pub sentiment_weight: f64,
    pub disagreement_penalty: f64,
    /// |score| at or below this is treated as no sentiment bias.
    pub sentiment_neutral_band: f64,
    pub high_risk_cap: f64,
    /// The resolver is consulted for fused confidence in `[ambiguous_low, ambiguous_high)`.
    pub ambiguous_low: f64,
    pub ambiguous_high: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            technical_weight: 0.70,
            sentiment_weight: 0.30,
            disagreement_penalty: 0.10,
            sentiment_neutral_band: 0.10,
            high_risk_cap: 0.40,
            ambiguous_low: 0.0,
            ambiguous_high: 0.60,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let unit = 0.0..=1.0;
        if !unit.contains(&self.technical_weight) || !unit.contains(&self.sentiment_weight) {
            problems.push("fusion weights must be in [0, 1]".into());
        }
        if (self.technical_weight + self.sentiment_weight - 1.0).abs() > 1e-9 {
            problems.push("fusion.technical_weight + sentiment_weight must equal 1".into());
        }
        if !unit.contains(&self.disagreement_penalty) {
            problems.push("fusion.disagreement_penalty must be in [0, 1]".into());
        }
        if !unit.contains(&self.sentiment_neutral_band) {
            problems.push("fusion.sentiment_neutral_band must be in [0, 1]".into());
        }
        if !unit.contains(&self.high_risk_cap) {
            problems.push("fusion.high_risk_cap must be in [0, 1]".into());
        }
        if !(self.ambiguous_low <= self.ambiguous_high) {
            problems.push("fusion.ambiguous_low must not exceed ambiguous_high".into());
        }
        problems
    }

    fn is_ambiguous(&self, confidence: f64) -> bool {
        confidence >= self.ambiguous_low && confidence < self.ambiguous_high
    }
}

/// Caps resolver calls per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverBudget {
    remaining: u32,
}

impl ResolverBudget {
    pub fn new(calls: u32) -> Self {
        Self { remaining: calls }
    }

    /// One call per iteration.
    pub fn per_iteration() -> Self {
        Self::new(1)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    fn try_spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    pub signal: Signal,
    pub risk_level: RiskLevel,
    pub sentiment_score: f64,
    /// Whether the ambiguity resolver changed the outcome.
    pub resolved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SignalFusion {
    config: FusionConfig,
}

impl SignalFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Direction implied by the sentiment score, `Hold` inside the neutral band.
    pub fn sentiment_bias(&self, sentiment: &SentimentReading) -> Action {
        if sentiment.score > self.config.sentiment_neutral_band {
            Action::Buy
        } else if sentiment.score < -self.config.sentiment_neutral_band {
            Action::Sell
        } else {
            Action::Hold
        }
    }

    /// Fused confidence before resolver and risk cap.
    pub fn combine(&self, technical: &Signal, sentiment: &SentimentReading) -> f64 {
        let cfg = &self.config;
        let bias = self.sentiment_bias(sentiment);
        let directional = technical.action.is_directional() && bias.is_directional();
        let agrees = directional && bias == technical.action;
        let disagrees = directional && bias != technical.action;

        let support = if agrees { sentiment.score.abs() } else { 0.0 };
        let mut fused = cfg.technical_weight * technical.confidence + cfg.sentiment_weight * support;
        if disagrees {
            fused -= cfg.disagreement_penalty;
        }
        clamp_unit(fused)
    }

    pub fn fuse(
        &self,
        symbol: &str,
        technical: &Signal,
        sentiment: &SentimentReading,
        resolver: &dyn AmbiguityResolver,
        budget: &mut ResolverBudget,
    ) -> FusedSignal {
        let mut action = technical.action;
        let mut confidence = self.cap(self.combine(technical, sentiment), sentiment.risk_level);
        let mut reasons = technical.reasons.clone();
        reasons.push(format!(
            "sentiment {:+.2} ({:?} risk)",
            sentiment.score, sentiment.risk_level
        ));

        let mut resolved = false;
        if self.config.is_ambiguous(confidence) && budget.try_spend() {
            let context = AmbiguityContext {
                symbol: symbol.to_string(),
                technical: technical.clone(),
                sentiment: *sentiment,
                fused_confidence: confidence,
            };
            if let Some(resolution) = resolver.resolve(&context) {
                debug!(
                    resolver = resolver.name(),
                    from = %action,
                    to = %resolution.action,
                    confidence = resolution.confidence,
                    "ambiguous signal resolved"
                );
                action = resolution.action;
                confidence = self.cap(clamp_unit(resolution.confidence), sentiment.risk_level);
                reasons.push(format!("resolved by {}", resolver.name()));
                resolved = true;
            }
        }

        if action == Action::Hold {
            confidence = 0.0;
        }

        FusedSignal {
            signal: Signal {
                action,
                confidence,
                reasons,
                stop_loss_pct: technical.stop_loss_pct,
                take_profit_pct: technical.take_profit_pct,
            },
            risk_level: sentiment.risk_level,
            sentiment_score: sentiment.score,
            resolved,
        }
    }

    fn cap(&self, confidence: f64, risk: RiskLevel) -> f64 {
        if risk == RiskLevel::High {
            confidence.min(self.config.high_risk_cap)
        } else {
            confidence
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{NoopResolver, Resolution};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedResolver {
        answer: Resolution,
        calls: AtomicUsize,
    }

    impl FixedResolver {
        fn new(action: Action, confidence: f64) -> Self {
            Self {
                answer: Resolution { action, confidence },
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AmbiguityResolver for FixedResolver {
        fn name(&self) -> &str {
            "fixed"
        }

        fn resolve(&self, _context: &AmbiguityContext) -> Option<Resolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(self.answer)
        }
    }

    fn buy(confidence: f64) -> Signal {
        Signal::new(Action::Buy, confidence, vec!["test".into()], 0.015, 0.025)
    }

    fn fuse(signal: &Signal, sentiment: SentimentReading) -> FusedSignal {
        SignalFusion::default().fuse(
            "BTCUSDT",
            signal,
            &sentiment,
            &NoopResolver,
            &mut ResolverBudget::per_iteration(),
        )
    }

    #[test]
    fn agreeing_sentiment_adds_support() {
        let out = fuse(&buy(0.8), SentimentReading::new(0.5, RiskLevel::Low));
        assert_eq!(out.signal.action, Action::Buy);
        assert!((out.signal.confidence - (0.7 * 0.8 + 0.3 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn disagreement_penalizes_without_flipping() {
        let out = fuse(&buy(0.8), SentimentReading::new(-0.6, RiskLevel::Low));
        assert_eq!(out.signal.action, Action::Buy);
        assert!((out.signal.confidence - (0.56 - 0.10)).abs() < 1e-12);
    }

    #[test]
    fn neutral_sentiment_neither_supports_nor_penalizes() {
        let out = fuse(&buy(0.8), SentimentReading::new(-0.05, RiskLevel::Medium));
        assert!((out.signal.confidence - 0.56).abs() < 1e-12);
    }

    #[test]
    fn high_risk_caps_below_threshold() {
        let out = fuse(&buy(1.0), SentimentReading::new(1.0, RiskLevel::High));
        assert_eq!(out.signal.confidence, 0.40);
        assert_eq!(out.risk_level, RiskLevel::High);
    }

    #[test]
    fn hold_stays_hold_with_zero_confidence() {
        let out = fuse(&Signal::hold("quiet"), SentimentReading::new(0.9, RiskLevel::Low));
        assert_eq!(out.signal.action, Action::Hold);
        assert_eq!(out.signal.confidence, 0.0);
    }

    #[test]
    fn resolver_consulted_only_inside_ambiguous_band() {
        let fusion = SignalFusion::default();
        let resolver = FixedResolver::new(Action::Sell, 0.7);
        let sentiment = SentimentReading::new(0.5, RiskLevel::Low);

        // 0.7 * 0.9 + 0.15 = 0.78: outside the band
        let mut budget = ResolverBudget::per_iteration();
        let out = fusion.fuse("X", &buy(0.9), &sentiment, &resolver, &mut budget);
        assert!(!out.resolved);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(budget.remaining(), 1);

        // 0.7 * 0.5 + 0.15 = 0.50: inside
        let out = fusion.fuse("X", &buy(0.5), &sentiment, &resolver, &mut budget);
        assert!(out.resolved);
        assert_eq!(out.signal.action, Action::Sell);
        assert_eq!(out.signal.confidence, 0.7);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolver_budget_is_one_call_per_iteration() {
        let fusion = SignalFusion::default();
        let resolver = FixedResolver::new(Action::Buy, 0.7);
        let sentiment = SentimentReading::neutral();
        let mut budget = ResolverBudget::per_iteration();

        fusion.fuse("X", &buy(0.5), &sentiment, &resolver, &mut budget);
        let second = fusion.fuse("X", &buy(0.5), &sentiment, &resolver, &mut budget);
        assert!(!second.resolved);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn high_risk_cap_survives_resolution() {
        let fusion = SignalFusion::default();
        let resolver = FixedResolver::new(Action::Buy, 0.95);
        let out = fusion.fuse(
            "X",
            &buy(0.9),
            &SentimentReading::new(0.9, RiskLevel::High),
            &resolver,
            &mut ResolverBudget::per_iteration(),
        );
        assert!(out.resolved);
        assert_eq!(out.signal.confidence, 0.40);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FusionConfig::default().validate().is_empty());
    }
}
