//! Bot configuration loaded from TOML.
//!
//! ```toml
//! [session]
//! symbol = "BTCUSDT"
//! duration_minutes = 60
//! interval_secs = 60
//!
//! [market]
//! provider = "binance"          # binance | synthetic | csv
//! testnet = true
//!
//! [sentiment]
//! provider = "fear_greed"       # fear_greed | static
//! cache_ttl_secs = 300
//!
//! [execution]
//! slippage_bps = 5.0
//!
//! [resolver]
//! provider = "none"             # none
//!
//! [paths]
//! state_dir = "state"
//!
//! [engine.risk]
//! capital = 1000.0
//! ```
//!
//! Every table is optional; missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tradeloop_core::domain::RiskLevel;
use tradeloop_core::{EngineConfig, EngineError};

use crate::providers::interval_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub symbol: String,
    pub duration_minutes: u64,
    /// Pause between iterations.
    pub interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".into(),
            duration_minutes: 10,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSource {
    Binance,
    Synthetic,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub provider: MarketSource,
    pub testnet: bool,
    /// Overrides the mainnet/testnet endpoint when set.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub seed: u64,
    pub start_price: f64,
    pub csv_path: Option<PathBuf>,
    /// Interval of the rows in `csv_path`.
    pub csv_interval: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            provider: MarketSource::Synthetic,
            testnet: true,
            base_url: None,
            timeout_secs: 10,
            breaker_cooldown_secs: 300,
            seed: 42,
            start_price: 100.0,
            csv_path: None,
            csv_interval: "5m".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentSource {
    FearGreed,
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub provider: SentimentSource,
    pub url: Option<String>,
    pub cache_ttl_secs: u64,
    pub timeout_secs: u64,
    /// Reading used by the static provider.
    pub static_score: f64,
    pub static_risk: RiskLevel,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            provider: SentimentSource::Static,
            url: None,
            cache_ttl_secs: 300,
            timeout_secs: 10,
            static_score: 0.0,
            static_risk: RiskLevel::Low,
        }
    }
}

/// Tie-breaker for ambiguous fused signals. Only the no-op resolver ships;
/// other implementations of `AmbiguityResolver` get a variant here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverSource {
    #[default]
    None,
}

impl std::str::FromStr for ResolverSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ResolverSource::None),
            other => Err(format!("unknown resolver {other:?} (available: none)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub provider: ResolverSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub slippage_bps: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { slippage_bps: 5.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub session: SessionConfig,
    pub market: MarketConfig,
    pub sentiment: SentimentConfig,
    pub execution: ExecutionConfig,
    pub resolver: ResolverConfig,
    pub paths: PathsConfig,
    pub engine: EngineConfig,
}

impl BotConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BotConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Engine rules plus the runner's own checks, all reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = match self.engine.validate() {
            Ok(()) => Vec::new(),
            Err(EngineError::ConfigValidation(problems)) => problems,
            Err(other) => vec![other.to_string()],
        };

        if self.session.symbol.trim().is_empty() {
            problems.push("session.symbol must not be empty".into());
        }
        if self.session.interval_secs == 0 {
            problems.push("session.interval_secs must be > 0".into());
        }
        if self.session.duration_minutes == 0 {
            problems.push("session.duration_minutes must be > 0".into());
        }
        if self.market.timeout_secs == 0 {
            problems.push("market.timeout_secs must be > 0".into());
        }
        if self.market.provider == MarketSource::Csv && self.market.csv_path.is_none() {
            problems.push("market.csv_path is required when market.provider = \"csv\"".into());
        }
        if interval_duration(&self.market.csv_interval).is_none() {
            problems.push(format!("market.csv_interval {:?} is not a valid interval", self.market.csv_interval));
        }
        if !(self.market.start_price.is_finite() && self.market.start_price > 0.0) {
            problems.push("market.start_price must be > 0".into());
        }
        if !(-1.0..=1.0).contains(&self.sentiment.static_score) {
            problems.push("sentiment.static_score must be within [-1, 1]".into());
        }
        if !(self.execution.slippage_bps.is_finite() && self.execution.slippage_bps >= 0.0) {
            problems.push("execution.slippage_bps must be >= 0".into());
        }
        let mut intervals = self.engine.timeframes.intervals.clone();
        intervals.push(self.engine.lifecycle.signal_interval.clone());
        for interval in intervals {
            if interval_duration(&interval).is_none() {
                problems.push(format!("interval {interval:?} is not a valid kline interval"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = BotConfig::from_toml_str("").unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.session.symbol, "BTCUSDT");
        assert_eq!(config.market.provider, MarketSource::Synthetic);
    }

    #[test]
    fn parses_full_document() {
        let config = BotConfig::from_toml_str(
            r#"
            [session]
            symbol = "ETHUSDT"
            duration_minutes = 30
            interval_secs = 15

            [market]
            provider = "binance"
            testnet = false

            [sentiment]
            provider = "fear_greed"
            cache_ttl_secs = 120

            [execution]
            slippage_bps = 2.5

            [paths]
            state_dir = "/tmp/tradeloop"

            [engine.risk]
            capital = 5000.0
            risk_pct = 0.01

            [engine.lifecycle]
            allow_short = false
            "#,
        )
        .unwrap();
        assert_eq!(config.session.symbol, "ETHUSDT");
        assert_eq!(config.market.provider, MarketSource::Binance);
        assert!(!config.market.testnet);
        assert_eq!(config.sentiment.provider, SentimentSource::FearGreed);
        assert_eq!(config.execution.slippage_bps, 2.5);
        assert_eq!(config.paths.state_dir, PathBuf::from("/tmp/tradeloop"));
        assert_eq!(config.engine.risk.capital, 5000.0);
        assert_eq!(config.engine.risk.risk_pct, 0.01);
        assert_eq!(config.engine.risk.confidence_threshold, 0.45);
        assert!(!config.engine.lifecycle.allow_short);
    }

    #[test]
    fn csv_source_requires_a_path() {
        let err = BotConfig::from_toml_str("[market]\nprovider = \"csv\"").unwrap_err();
        assert!(err.to_string().contains("csv_path"));
    }

    #[test]
    fn engine_and_runner_problems_are_reported_together() {
        let err = BotConfig::from_toml_str(
            r#"
            [session]
            interval_secs = 0
            [engine.risk]
            capital = -1.0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(problems) => {
                assert!(problems.iter().any(|p| p.contains("interval_secs")));
                assert!(problems.iter().any(|p| p.contains("capital")));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn unknown_provider_is_a_parse_error() {
        let err = BotConfig::from_toml_str("[market]\nprovider = \"kraken\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn resolver_defaults_to_none() {
        let config = BotConfig::from_toml_str("[resolver]\nprovider = \"none\"").unwrap();
        assert_eq!(config.resolver.provider, ResolverSource::None);
        assert_eq!(BotConfig::default().resolver.provider, ResolverSource::None);
    }

    #[test]
    fn unavailable_resolver_is_refused() {
        let err = BotConfig::from_toml_str("[resolver]\nprovider = \"gpt\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let parsed: Result<ResolverSource, _> = "gpt".parse();
        assert!(parsed.unwrap_err().contains("available: none"));
        assert_eq!("None".parse::<ResolverSource>(), Ok(ResolverSource::None));
    }

    #[test]
    fn bad_interval_is_rejected() {
        let err = BotConfig::from_toml_str("[engine.lifecycle]\nsignal_interval = \"5q\"").unwrap_err();
        assert!(err.to_string().contains("5q"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BotConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
