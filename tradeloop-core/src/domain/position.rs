//! Open position and trailing-stop ratchet.
//!
//! **Core rule:** the stop may tighten, never loosen. For longs the stop only
//! rises; for shorts it only falls. The trailing anchor records the most
//! favorable price seen since entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::Action;
use super::trade::CloseReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side opened by a directional action. `Hold` opens nothing.
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Buy => Some(PositionSide::Long),
            Action::Sell => Some(PositionSide::Short),
            Action::Hold => None,
        }
    }

    /// The action that would reverse this side.
    pub fn exit_action(self) -> Action {
        match self {
            PositionSide::Long => Action::Sell,
            PositionSide::Short => Action::Buy,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => f.write_str("LONG"),
            PositionSide::Short => f.write_str("SHORT"),
        }
    }
}

/// The single open position owned by the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    /// Base-asset quantity.
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Most favorable price seen since entry.
    pub trailing_anchor: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Build a position from a confirmed fill, placing stop and target at the
    /// given fractional distances from the fill price.
    pub fn from_fill(
        symbol: impl Into<String>,
        side: PositionSide,
        fill_price: f64,
        size: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let (stop_loss, take_profit) = match side {
            PositionSide::Long => (
                fill_price * (1.0 - stop_loss_pct),
                fill_price * (1.0 + take_profit_pct),
            ),
            PositionSide::Short => (
                fill_price * (1.0 + stop_loss_pct),
                fill_price * (1.0 - take_profit_pct),
            ),
        };
        Self {
            symbol: symbol.into(),
            side,
            entry_price: fill_price,
            size,
            stop_loss,
            take_profit,
            trailing_anchor: fill_price,
            opened_at,
        }
    }

    /// Quote-currency value at entry.
    pub fn notional(&self) -> f64 {
        self.entry_price * self.size
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.size
    }

    /// Move the trailing anchor and, once price has moved favorably by more
    /// than `trailing_pct` from entry, ratchet the stop behind the anchor.
    ///
    /// Returns the new stop level when it moved.
    pub fn update_trailing(&mut self, price: f64, trailing_pct: f64) -> Option<f64> {
        if !price.is_finite() || trailing_pct <= 0.0 {
            return None;
        }
        match self.side {
            PositionSide::Long => {
                self.trailing_anchor = self.trailing_anchor.max(price);
                if self.trailing_anchor < self.entry_price * (1.0 + trailing_pct) {
                    return None;
                }
                self.ratchet_stop(self.trailing_anchor * (1.0 - trailing_pct))
            }
            PositionSide::Short => {
                self.trailing_anchor = self.trailing_anchor.min(price);
                if self.trailing_anchor > self.entry_price * (1.0 - trailing_pct) {
                    return None;
                }
                self.ratchet_stop(self.trailing_anchor * (1.0 + trailing_pct))
            }
        }
    }

    /// Apply a proposed stop level; only tightening moves are accepted.
    pub fn ratchet_stop(&mut self, proposed: f64) -> Option<f64> {
        let tighter = match self.side {
            PositionSide::Long => proposed > self.stop_loss,
            PositionSide::Short => proposed < self.stop_loss,
        };
        if tighter {
            self.stop_loss = proposed;
            Some(proposed)
        } else {
            None
        }
    }

    /// Price-based exit check. Stop-loss wins over take-profit.
    pub fn price_exit(&self, price: f64) -> Option<CloseReason> {
        match self.side {
            PositionSide::Long => {
                if price <= self.stop_loss {
                    Some(CloseReason::StopLoss)
                } else if price >= self.take_profit {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if price >= self.stop_loss {
                    Some(CloseReason::StopLoss)
                } else if price <= self.take_profit {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn opened() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn long_at_100() -> Position {
        Position::from_fill("BTCUSDT", PositionSide::Long, 100.0, 2.0, 0.02, 0.03, opened())
    }

    fn short_at_100() -> Position {
        Position::from_fill("BTCUSDT", PositionSide::Short, 100.0, 2.0, 0.02, 0.03, opened())
    }

    #[test]
    fn long_levels_from_fill() {
        let p = long_at_100();
        assert!((p.stop_loss - 98.0).abs() < 1e-9);
        assert!((p.take_profit - 103.0).abs() < 1e-9);
        assert_eq!(p.trailing_anchor, 100.0);
        assert_eq!(p.notional(), 200.0);
    }

    #[test]
    fn short_levels_from_fill() {
        let p = short_at_100();
        assert!((p.stop_loss - 102.0).abs() < 1e-9);
        assert!((p.take_profit - 97.0).abs() < 1e-9);
    }

    #[test]
    fn pnl_sign_follows_side() {
        assert!((long_at_100().unrealized_pnl(101.0) - 2.0).abs() < 1e-9);
        assert!((short_at_100().unrealized_pnl(101.0) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_waits_for_activation_distance() {
        let mut p = long_at_100();
        assert_eq!(p.update_trailing(100.5, 0.01), None);
        assert_eq!(p.trailing_anchor, 100.5);
        assert!((p.stop_loss - 98.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_long_tightens_and_never_loosens() {
        let mut p = long_at_100();
        let moved = p.update_trailing(102.0, 0.01).unwrap();
        assert!((moved - 100.98).abs() < 1e-9);
        // Pullback: anchor stays at the high, stop unchanged
        assert_eq!(p.update_trailing(101.0, 0.01), None);
        assert!((p.stop_loss - 100.98).abs() < 1e-9);
        assert_eq!(p.trailing_anchor, 102.0);
    }

    #[test]
    fn trailing_short_tightens_downward() {
        let mut p = short_at_100();
        let moved = p.update_trailing(97.0, 0.01).unwrap();
        assert!((moved - 97.97).abs() < 1e-9);
        assert_eq!(p.update_trailing(99.0, 0.01), None);
        assert!((p.stop_loss - 97.97).abs() < 1e-9);
    }

    #[test]
    fn ratchet_rejects_loosening() {
        let mut p = long_at_100();
        assert_eq!(p.ratchet_stop(95.0), None);
        assert_eq!(p.ratchet_stop(99.0), Some(99.0));
        assert_eq!(p.ratchet_stop(98.5), None);
        assert_eq!(p.stop_loss, 99.0);
    }

    #[test]
    fn price_exit_priority() {
        let p = long_at_100();
        assert_eq!(p.price_exit(97.5), Some(CloseReason::StopLoss));
        assert_eq!(p.price_exit(103.5), Some(CloseReason::TakeProfit));
        assert_eq!(p.price_exit(100.0), None);

        let s = short_at_100();
        assert_eq!(s.price_exit(102.5), Some(CloseReason::StopLoss));
        assert_eq!(s.price_exit(96.0), Some(CloseReason::TakeProfit));
    }

    #[test]
    fn side_from_action() {
        assert_eq!(PositionSide::from_action(Action::Buy), Some(PositionSide::Long));
        assert_eq!(PositionSide::from_action(Action::Sell), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_action(Action::Hold), None);
        assert_eq!(PositionSide::Long.exit_action(), Action::Sell);
    }
}
