//! Tradeloop Core: signal fusion and risk-managed position lifecycle.
//!
//! This crate contains the trading decision engine:
//! - Domain types (candles, signals, positions, trade records)
//! - Indicator engine and candlestick pattern recognition
//! - Multi-timeframe aggregation and market regime classification
//! - Momentum and mean-reversion signal generators
//! - Technical/sentiment signal fusion with an optional ambiguity resolver
//! - Risk manager (sizing, adaptive stops, drawdown and daily-loss gates)
//! - Position lifecycle controller driving one loop iteration at a time
//!
//! Collaborators (market data, order execution, sentiment, persistence) are
//! traits in [`ports`]; concrete adapters live in `tradeloop-runner`.

pub mod config;
pub mod domain;
pub mod error;
pub mod fusion;
pub mod indicators;
pub mod lifecycle;
pub mod patterns;
pub mod ports;
pub mod regime;
pub mod risk;
pub mod strategy;
pub mod timeframe;

pub use config::EngineConfig;
pub use error::EngineError;
pub use lifecycle::{Collaborators, Controller, IterationOutcome, LifecycleState};
