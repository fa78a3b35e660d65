//! Directional signals and sentiment readings.

use serde::{Deserialize, Serialize};

/// Trading action proposed by a strategy or the fusion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// The action pointing the other way. `Hold` has no opposite.
    pub fn opposite(self) -> Action {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
            Action::Hold => Action::Hold,
        }
    }

    pub fn is_directional(self) -> bool {
        self != Action::Hold
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Risk label attached to an external sentiment reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Compiled sentiment score for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    /// In [-1, 1]; positive is bullish.
    pub score: f64,
    pub risk_level: RiskLevel,
}

impl SentimentReading {
    pub fn new(score: f64, risk_level: RiskLevel) -> Self {
        let score = if score.is_finite() {
            score.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self { score, risk_level }
    }

    pub fn neutral() -> Self {
        Self::new(0.0, RiskLevel::Medium)
    }
}

/// A technical or fused trading signal. Produced fresh each evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    /// In [0, 1].
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Proposed stop-loss distance as a fraction of entry price.
    pub stop_loss_pct: f64,
    /// Proposed take-profit distance as a fraction of entry price.
    pub take_profit_pct: f64,
}

impl Signal {
    pub fn new(
        action: Action,
        confidence: f64,
        reasons: Vec<String>,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Self {
        Self {
            action,
            confidence: clamp_unit(confidence),
            reasons,
            stop_loss_pct,
            take_profit_pct,
        }
    }

    /// No-opinion signal.
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            reasons: vec![reason.into()],
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
        }
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
