//! Domain types for the trading engine.

pub mod candle;
pub mod position;
pub mod signal;
pub mod trade;

pub use candle::{closes, Candle};
pub use position::{Position, PositionSide};
pub use signal::{clamp_unit, Action, RiskLevel, SentimentReading, Signal};
pub use trade::{CloseReason, TradeId, TradeRecord};

/// Symbol type alias
pub type Symbol = String;
