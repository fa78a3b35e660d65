//! Momentum: weighted vote across trend-following evidence.
//!
//! Each component casts a BUY or SELL vote (or abstains) with a fixed weight.
//! Components whose inputs are unavailable are dropped from the total, so the
//! confidence is the dominant side's weight over the weight that could vote.
//! Candlestick patterns only join the ballot when their net bias is non-zero.

use serde::{Deserialize, Serialize};

use super::{insufficient_indicators, SignalGenerator};
use crate::domain::{Action, Candle, Signal};
use crate::indicators::IndicatorSnapshot;
use crate::patterns::PatternReport;
use crate::regime::trend_agreement;
use crate::timeframe::TimeframeSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub rsi_weight: f64,
    pub macd_weight: f64,
    pub bollinger_weight: f64,
    pub adx_weight: f64,
    pub timeframe_weight: f64,
    pub pattern_weight: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// DI spread only votes when ADX is at least this strong.
    pub adx_min: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            rsi_weight: 0.20,
            macd_weight: 0.25,
            bollinger_weight: 0.15,
            adx_weight: 0.15,
            timeframe_weight: 0.25,
            pattern_weight: 0.10,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            adx_min: 20.0,
            stop_loss_pct: 0.015,
            take_profit_pct: 0.025,
        }
    }
}

impl MomentumConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let weights = [
            self.rsi_weight,
            self.macd_weight,
            self.bollinger_weight,
            self.adx_weight,
            self.timeframe_weight,
            self.pattern_weight,
        ];
        if weights.iter().any(|w| !(*w >= 0.0)) {
            problems.push("strategy.momentum weights must be >= 0".into());
        }
        if !(weights.iter().sum::<f64>() > 0.0) {
            problems.push("strategy.momentum weights must not all be zero".into());
        }
        if !(self.rsi_oversold < self.rsi_overbought) {
            problems.push("strategy.momentum.rsi_oversold must be below rsi_overbought".into());
        }
        if !(self.stop_loss_pct > 0.0 && self.take_profit_pct > 0.0) {
            problems.push("strategy.momentum stop/take-profit must be > 0".into());
        }
        problems
    }
}

#[derive(Debug, Clone, Default)]
pub struct MomentumStrategy {
    config: MomentumConfig,
    min_available: usize,
}

/// Running tally of weighted votes.
#[derive(Debug, Default)]
struct Ballot {
    buy: f64,
    sell: f64,
    total: f64,
    reasons: Vec<String>,
}

impl Ballot {
    fn cast(&mut self, weight: f64, vote: Option<Action>, reason: String) {
        self.total += weight;
        match vote {
            Some(Action::Buy) => self.buy += weight,
            Some(Action::Sell) => self.sell += weight,
            _ => return,
        }
        self.reasons.push(reason);
    }
}

impl MomentumStrategy {
    pub fn new(config: MomentumConfig, min_available: usize) -> Self {
        Self {
            config,
            min_available,
        }
    }

    fn rsi_vote(&self, rsi: f64) -> Option<Action> {
        let cfg = &self.config;
        if rsi <= cfg.rsi_oversold {
            Some(Action::Buy)
        } else if rsi >= cfg.rsi_overbought {
            Some(Action::Sell)
        } else if rsi > 50.0 {
            Some(Action::Buy)
        } else if rsi < 50.0 {
            Some(Action::Sell)
        } else {
            None
        }
    }
}

fn direction(value: f64) -> Option<Action> {
    if value > 0.0 {
        Some(Action::Buy)
    } else if value < 0.0 {
        Some(Action::Sell)
    } else {
        None
    }
}

impl SignalGenerator for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn generate(
        &self,
        _candles: &[Candle],
        ind: &IndicatorSnapshot,
        patterns: &PatternReport,
        summaries: &[TimeframeSummary],
    ) -> Signal {
        if let Some(hold) = insufficient_indicators(ind, self.min_available) {
            return hold;
        }
        let cfg = &self.config;
        let mut ballot = Ballot::default();

        if let Some(rsi) = ind.rsi {
            ballot.cast(cfg.rsi_weight, self.rsi_vote(rsi), format!("RSI {rsi:.1}"));
        }
        if let (Some(macd), Some(signal)) = (ind.macd, ind.macd_signal) {
            let vote = direction(macd - signal);
            let label = if macd > signal { "above" } else { "below" };
            ballot.cast(cfg.macd_weight, vote, format!("MACD {label} signal"));
        }
        if let (Some(close), Some(middle)) = (ind.close, ind.bollinger_middle) {
            ballot.cast(
                cfg.bollinger_weight,
                direction(close - middle),
                format!("close {close:.2} vs Bollinger middle {middle:.2}"),
            );
        }
        if let (Some(adx), Some(plus), Some(minus)) = (ind.adx, ind.plus_di, ind.minus_di) {
            let vote = if adx >= cfg.adx_min {
                direction(plus - minus)
            } else {
                None
            };
            ballot.cast(
                cfg.adx_weight,
                vote,
                format!("ADX {adx:.1} with +DI {plus:.1} / -DI {minus:.1}"),
            );
        }
        if !summaries.is_empty() {
            let agreement = trend_agreement(summaries);
            let weight = cfg.timeframe_weight;
            ballot.total += weight;
            if agreement != 0.0 {
                let share = weight * agreement.abs();
                if agreement > 0.0 {
                    ballot.buy += share;
                } else {
                    ballot.sell += share;
                }
                ballot.reasons.push(format!("timeframe agreement {agreement:+.2}"));
            }
        }

        let net = patterns.net_bias();
        if net != 0 && cfg.pattern_weight > 0.0 {
            ballot.cast(
                cfg.pattern_weight,
                direction(f64::from(net)),
                format!("pattern bias {net:+}"),
            );
        }

        if ballot.total <= 0.0 || ballot.buy == ballot.sell {
            return Signal::hold("momentum votes tied");
        }
        let (action, dominant) = if ballot.buy > ballot.sell {
            (Action::Buy, ballot.buy)
        } else {
            (Action::Sell, ballot.sell)
        };
        Signal::new(
            action,
            dominant / ballot.total,
            ballot.reasons,
            cfg.stop_loss_pct,
            cfg.take_profit_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::full_snapshot;
    use crate::timeframe::Bias;

    fn summary(bias: Bias) -> TimeframeSummary {
        TimeframeSummary {
            interval: "15m".into(),
            trend_pct: 0.0,
            bias,
            confidence: 0.5,
            close: 100.0,
            indicators: IndicatorSnapshot::default(),
        }
    }

    fn strategy() -> MomentumStrategy {
        MomentumStrategy::new(MomentumConfig::default(), 4)
    }

    fn bullish_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: Some(60.0),
            macd: Some(0.5),
            macd_signal: Some(0.2),
            close: Some(102.0),
            adx: Some(28.0),
            plus_di: Some(30.0),
            minus_di: Some(15.0),
            ..full_snapshot()
        }
    }

    #[test]
    fn unanimous_bullish_evidence_is_full_confidence_buy() {
        let bulls = vec![summary(Bias::Bullish); 3];
        let s = strategy().generate(&[], &bullish_snapshot(), &PatternReport::default(), &bulls);
        assert_eq!(s.action, Action::Buy);
        assert!((s.confidence - 1.0).abs() < 1e-12);
        assert_eq!(s.stop_loss_pct, 0.015);
        assert_eq!(s.take_profit_pct, 0.025);
        assert_eq!(s.reasons.len(), 5);
    }

    #[test]
    fn confidence_is_dominant_share_of_available_weight() {
        // RSI sells (0.2), everything else buys (0.25 + 0.15 + 0.15), no timeframes
        let ind = IndicatorSnapshot {
            rsi: Some(40.0),
            ..bullish_snapshot()
        };
        let s = strategy().generate(&[], &ind, &PatternReport::default(), &[]);
        assert_eq!(s.action, Action::Buy);
        assert!((s.confidence - 0.55 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn weak_adx_abstains_but_still_counts() {
        let ind = IndicatorSnapshot {
            adx: Some(12.0),
            ..bullish_snapshot()
        };
        let s = strategy().generate(&[], &ind, &PatternReport::default(), &[]);
        assert_eq!(s.action, Action::Buy);
        assert!((s.confidence - 0.60 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn bearish_evidence_sells() {
        let ind = IndicatorSnapshot {
            rsi: Some(42.0),
            macd: Some(-0.5),
            macd_signal: Some(-0.1),
            close: Some(97.0),
            adx: Some(26.0),
            plus_di: Some(12.0),
            minus_di: Some(27.0),
            ..full_snapshot()
        };
        let bears = vec![summary(Bias::Bearish), summary(Bias::Bearish)];
        let s = strategy().generate(&[], &ind, &PatternReport::default(), &bears);
        assert_eq!(s.action, Action::Sell);
        assert!(s.confidence > 0.9);
    }

    #[test]
    fn tie_holds() {
        // Neutral snapshot: RSI 50, MACD == signal, close at middle, weak ADX
        let s = strategy().generate(&[], &full_snapshot(), &PatternReport::default(), &[]);
        assert_eq!(s.action, Action::Hold);
        assert_eq!(s.confidence, 0.0);
    }

    fn patterns(bullish: &[&str], bearish: &[&str]) -> PatternReport {
        PatternReport {
            bullish: bullish.iter().map(|p| p.to_string()).collect(),
            bearish: bearish.iter().map(|p| p.to_string()).collect(),
            ..PatternReport::default()
        }
    }

    #[test]
    fn pattern_bias_breaks_a_tie() {
        let s = strategy().generate(
            &[],
            &full_snapshot(),
            &patterns(&["Bullish Engulfing"], &[]),
            &[],
        );
        assert_eq!(s.action, Action::Buy);
        // Only the pattern voted; RSI, MACD, Bollinger and ADX abstained.
        assert!((s.confidence - 0.10 / 0.85).abs() < 1e-12);
        assert!(s.reasons.iter().any(|r| r == "pattern bias +1"));
    }

    #[test]
    fn opposing_patterns_dilute_confidence() {
        let bulls = vec![summary(Bias::Bullish); 3];
        let bearish = patterns(&[], &["Bearish Engulfing", "Bearish Hanging Man"]);
        let s = strategy().generate(&[], &bullish_snapshot(), &bearish, &bulls);
        assert_eq!(s.action, Action::Buy);
        assert!((s.confidence - 1.0 / 1.1).abs() < 1e-12);
        assert!(s.reasons.iter().any(|r| r == "pattern bias -2"));
    }

    #[test]
    fn balanced_patterns_abstain() {
        // A doji counts on both sides, so the net bias is zero.
        let doji = patterns(&["Doji"], &["Doji"]);
        let bulls = vec![summary(Bias::Bullish); 3];
        let s = strategy().generate(&[], &bullish_snapshot(), &doji, &bulls);
        assert!((s.confidence - 1.0).abs() < 1e-12);
        assert_eq!(s.reasons.len(), 5);
    }

    #[test]
    fn rsi_extremes_vote_against_the_move() {
        let m = strategy();
        assert_eq!(m.rsi_vote(25.0), Some(Action::Buy));
        assert_eq!(m.rsi_vote(75.0), Some(Action::Sell));
        assert_eq!(m.rsi_vote(50.0), None);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(MomentumConfig::default().validate().is_empty());
    }
}
