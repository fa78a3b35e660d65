//! Engine error taxonomy.
//!
//! Vetoes (low confidence, paused trading, avoid regime) are not errors; they
//! surface as `IterationOutcome::Rejected` so callers can tell "nothing to do"
//! apart from "something broke".

use thiserror::Error;

use crate::ports::ProviderError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Market or sentiment data could not be fetched. The iteration is skipped
    /// and no state changes.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Drawdown or daily-loss breach. Recoverable once thresholds clear.
    #[error("risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    /// An order call failed after exhausting retries on open.
    #[error("order execution failed after {attempts} attempt(s): {message}")]
    OrderExecution { attempts: u32, message: String },

    /// A close order failed after exhausting retries. The position is still
    /// open and will be retried on the next iteration.
    #[error("failed to close {symbol} position after {attempts} attempt(s): {message}")]
    CloseEscalation {
        symbol: String,
        attempts: u32,
        message: String,
    },

    /// Configuration rejected at startup.
    #[error("invalid configuration: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    #[error("state store error: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Whether the loop may continue with the next iteration.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::ConfigValidation(_))
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        EngineError::DataUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_lists_every_problem() {
        let err = EngineError::ConfigValidation(vec![
            "risk.capital must be > 0".into(),
            "fusion.high_risk_cap must be below risk.confidence_threshold".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("risk.capital"));
        assert!(msg.contains("high_risk_cap"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn provider_errors_map_to_data_unavailable() {
        let err: EngineError = ProviderError::Timeout("klines 5m".into()).into();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn close_escalation_names_the_symbol() {
        let err = EngineError::CloseEscalation {
            symbol: "BTCUSDT".into(),
            attempts: 3,
            message: "exchange rejected".into(),
        };
        assert!(err.to_string().contains("BTCUSDT"));
        assert!(err.to_string().contains("3 attempt"));
    }
}
