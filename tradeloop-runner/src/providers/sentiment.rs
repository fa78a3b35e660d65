//! Sentiment sources.
//!
//! The Fear & Greed index is market-wide, so the symbol is ignored. Index
//! values map to a score in [-1, 1] and a risk level by how extreme they are.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use tradeloop_core::domain::{RiskLevel, SentimentReading};
use tradeloop_core::ports::{ProviderError, SentimentProvider};

use super::JsonFetcher;
use crate::circuit_breaker::CircuitBreaker;

pub const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/?limit=1";

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    #[serde(default)]
    value_classification: String,
}

/// Map a 0..=100 index value onto a reading.
pub fn reading_from_index(value: f64) -> SentimentReading {
    let value = value.clamp(0.0, 100.0);
    let risk_level = if value <= 20.0 || value >= 80.0 {
        RiskLevel::High
    } else if value <= 35.0 || value >= 65.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };
    SentimentReading::new((value - 50.0) / 50.0, risk_level)
}

pub struct FearGreedProvider {
    url: String,
    fetcher: JsonFetcher,
}

impl FearGreedProvider {
    pub fn new(
        url: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            url: url.into(),
            fetcher: JsonFetcher::new(breaker, timeout, 2)?,
        })
    }
}

impl SentimentProvider for FearGreedProvider {
    fn name(&self) -> &str {
        "fear_greed"
    }

    fn compiled_score(&self, _symbol: &str) -> Result<SentimentReading, ProviderError> {
        let resp: FngResponse = self.fetcher.get(&self.url)?;
        let entry = resp
            .data
            .first()
            .ok_or_else(|| ProviderError::Parse("fear & greed response has no data".into()))?;
        let value: f64 = entry
            .value
            .trim()
            .parse()
            .map_err(|e| ProviderError::Parse(format!("fear & greed value {:?}: {e}", entry.value)))?;
        let reading = reading_from_index(value);
        debug!(
            value,
            classification = %entry.value_classification,
            score = reading.score,
            risk = ?reading.risk_level,
            "fear & greed index"
        );
        Ok(reading)
    }
}

/// Always returns the same reading. Used when sentiment is disabled.
#[derive(Debug, Clone, Copy)]
pub struct StaticSentiment {
    reading: SentimentReading,
}

impl StaticSentiment {
    pub fn new(reading: SentimentReading) -> Self {
        Self { reading }
    }

    pub fn neutral() -> Self {
        Self::new(SentimentReading::neutral())
    }
}

impl SentimentProvider for StaticSentiment {
    fn name(&self) -> &str {
        "static"
    }

    fn compiled_score(&self, _symbol: &str) -> Result<SentimentReading, ProviderError> {
        Ok(self.reading)
    }
}
