//! Tradeloop Runner: session orchestration on top of `tradeloop-core`.
//!
//! This crate provides:
//! - TOML bot configuration with validation
//! - Market data (Binance REST, synthetic random walk, CSV replay), paper
//!   execution and sentiment collaborators
//! - Circuit breaker and TTL cache for the network collaborators
//! - JSON state store for restart recovery
//! - The polling session loop and the performance report

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod providers;
pub mod session;

pub use cache::{CachedSentiment, TtlCache};
pub use circuit_breaker::CircuitBreaker;
pub use config::{BotConfig, ConfigError};
pub use metrics::{render_report, PerformanceSnapshot};
pub use persistence::JsonStateStore;
pub use session::{build_collaborators, Clock, Session, SessionError, SessionPlan, SessionReport};
