//! TradeRecord: an immutable closed round-trip trade.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::position::{Position, PositionSide};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    SignalReversal,
    StopLoss,
    TakeProfit,
    SessionEnd,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::SignalReversal => "signal_reversal",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::SessionEnd => "session_end",
        };
        f.write_str(s)
    }
}

/// Content-addressed trade identifier (BLAKE3 of the trade's identity fields).
///
/// Appending the same record twice yields the same id, which makes trade-log
/// appends safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn derive(
        symbol: &str,
        side: PositionSide,
        opened_at: DateTime<Utc>,
        closed_at: DateTime<Utc>,
        entry_price: f64,
        size: f64,
    ) -> Self {
        let canonical = format!(
            "{symbol}|{side}|{}|{}|{entry_price:.10}|{size:.10}",
            opened_at.timestamp_millis(),
            closed_at.timestamp_millis()
        );
        Self(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete round-trip trade: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Base-asset quantity, equal to the closed position's size.
    pub size: f64,
    /// Realized PnL in quote currency.
    pub pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
}

impl TradeRecord {
    /// Close `position` at `exit_price`.
    pub fn close(
        position: &Position,
        exit_price: f64,
        closed_at: DateTime<Utc>,
        reason: CloseReason,
    ) -> Self {
        let pnl = position.unrealized_pnl(exit_price);
        Self {
            id: TradeId::derive(
                &position.symbol,
                position.side,
                position.opened_at,
                closed_at,
                position.entry_price,
                position.size,
            ),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl,
            opened_at: position.opened_at,
            closed_at,
            reason,
        }
    }

    pub fn duration(&self) -> Duration {
        self.closed_at - self.opened_at
    }

    /// Return on the trade as a fraction of entry notional.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.size == 0.0 {
            return 0.0;
        }
        self.pnl / (self.entry_price * self.size)
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}
