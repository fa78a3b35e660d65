//! Collaborator contracts consumed by the lifecycle controller.
//!
//! Implementations live outside the core (exchange REST clients, paper
//! executors, sentiment feeds, JSON stores) so the engine can be driven by
//! scripted mocks in tests. All calls are synchronous and expected to be
//! bounded by the implementation's own timeout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Action, Candle, Position, PositionSide, SentimentReading, Signal, TradeRecord};
use crate::risk::RiskState;

/// Failures reported by collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("response could not be parsed: {0}")]
    Parse(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitOpen,

    #[error("i/o error: {0}")]
    Io(String),
}

/// Source of candles, oldest to newest.
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn candles(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>, ProviderError>;

    /// Release the next base candle for `symbol`. Called once at the start of
    /// every iteration, so all reads within an iteration see the same tape.
    /// Live feeds move on their own and keep the default.
    fn advance(&self, _symbol: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A confirmed execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    /// Base-asset quantity.
    pub size: f64,
}

/// Places and closes positions.
pub trait OrderExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        size: f64,
    ) -> Result<Fill, ProviderError>;

    fn close_position(&self, position: &Position) -> Result<Fill, ProviderError>;
}

/// Compiled sentiment score for a symbol. May cache or fall back internally.
pub trait SentimentProvider: Send + Sync {
    fn name(&self) -> &str;

    fn compiled_score(&self, symbol: &str) -> Result<SentimentReading, ProviderError>;
}

/// What the ambiguity resolver gets to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguityContext {
    pub symbol: String,
    pub technical: Signal,
    pub sentiment: SentimentReading,
    pub fused_confidence: f64,
}

/// A resolver's verdict, replacing the fused action and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: Action,
    pub confidence: f64,
}

/// Optional tie-breaker for signals whose fused confidence falls inside the
/// ambiguous band. Returning `None` keeps the fused signal unchanged.
pub trait AmbiguityResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, context: &AmbiguityContext) -> Option<Resolution>;
}

/// Default resolver: never changes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl AmbiguityResolver for NoopResolver {
    fn name(&self) -> &str {
        "noop"
    }

    fn resolve(&self, _context: &AmbiguityContext) -> Option<Resolution> {
        None
    }
}

/// Snapshot persisted between runs for restart recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub risk_state: RiskState,
    pub open_position: Option<Position>,
}

/// Durable storage for risk state, the open position, and the trade log.
///
/// Appends are at-least-once; readers de-duplicate by trade id.
pub trait StateStore: Send + Sync {
    fn load_state(&self) -> Result<Option<PersistedState>, ProviderError>;

    fn save_state(&self, state: &PersistedState) -> Result<(), ProviderError>;

    fn append_trade(&self, trade: &TradeRecord) -> Result<(), ProviderError>;

    fn load_trades(&self) -> Result<Vec<TradeRecord>, ProviderError>;
}
