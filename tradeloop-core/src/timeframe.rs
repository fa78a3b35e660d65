//! Multi-timeframe aggregation.
//!
//! For each configured interval: fetch candles, compute the indicator
//! snapshot, and measure the trend over the last `trend_window` candles:
//!
//! trend_pct = (last_close - close[N back]) / close[N back] * 100
//!
//! An interval whose fetch fails, or that returns too few candles, is left
//! out of the result. Nothing is substituted for it. At least one summary is
//! required or the whole aggregation fails with `DataUnavailable`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::Candle;
use crate::error::EngineError;
use crate::indicators::{compute_snapshot, IndicatorParams, IndicatorSnapshot};
use crate::ports::MarketDataProvider;

/// Directional bias of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSummary {
    pub interval: String,
    pub trend_pct: f64,
    pub bias: Bias,
    /// Confidence contribution in [0, 1].
    pub confidence: f64,
    pub close: f64,
    pub indicators: IndicatorSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeConfig {
    /// Interval labels understood by the market data provider, in priority order.
    pub intervals: Vec<String>,
    pub candle_limit: usize,
    /// Number of candles the trend is measured over.
    pub trend_window: usize,
    /// |trend_pct| above this is directional.
    pub bias_threshold_pct: f64,
}

impl Default for TimeframeConfig {
    fn default() -> Self {
        Self {
            intervals: vec!["5m".into(), "15m".into(), "1h".into()],
            candle_limit: 200,
            trend_window: 5,
            bias_threshold_pct: 0.5,
        }
    }
}

impl TimeframeConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.intervals.is_empty() {
            problems.push("timeframes.intervals must not be empty".into());
        }
        if self.trend_window == 0 {
            problems.push("timeframes.trend_window must be >= 1".into());
        }
        if self.candle_limit <= self.trend_window {
            problems.push("timeframes.candle_limit must exceed trend_window".into());
        }
        if !(self.bias_threshold_pct > 0.0) {
            problems.push("timeframes.bias_threshold_pct must be > 0".into());
        }
        problems
    }

    /// Intervals with duplicates removed, first occurrence kept.
    pub fn unique_intervals(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for interval in &self.intervals {
            if !seen.contains(&interval.as_str()) {
                seen.push(interval.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiTimeframeAggregator {
    config: TimeframeConfig,
    indicators: IndicatorParams,
}

impl MultiTimeframeAggregator {
    pub fn new(config: TimeframeConfig, indicators: IndicatorParams) -> Self {
        Self { config, indicators }
    }

    pub fn config(&self) -> &TimeframeConfig {
        &self.config
    }

    /// One summary per interval that could be fetched, in configured order.
    pub fn summarize(
        &self,
        symbol: &str,
        provider: &dyn MarketDataProvider,
    ) -> Result<Vec<TimeframeSummary>, EngineError> {
        let mut summaries = Vec::new();
        for interval in self.config.unique_intervals() {
            match provider.candles(symbol, interval, self.config.candle_limit) {
                Ok(candles) => match self.summarize_candles(interval, &candles) {
                    Some(summary) => {
                        debug!(
                            interval,
                            trend_pct = summary.trend_pct,
                            bias = ?summary.bias,
                            "timeframe summarized"
                        );
                        summaries.push(summary);
                    }
                    None => warn!(
                        interval,
                        candles = candles.len(),
                        "not enough candles for timeframe, skipping"
                    ),
                },
                Err(err) => warn!(interval, error = %err, "timeframe fetch failed, skipping"),
            }
        }

        if summaries.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "no timeframe data for {symbol}"
            )));
        }
        Ok(summaries)
    }

    /// Summarize already-fetched candles. `None` when there are fewer than
    /// `trend_window + 1` candles or the reference close is unusable.
    pub fn summarize_candles(&self, interval: &str, candles: &[Candle]) -> Option<TimeframeSummary> {
        let window = self.config.trend_window;
        if candles.len() < window + 1 {
            return None;
        }
        let last = candles[candles.len() - 1].close;
        let reference = candles[candles.len() - 1 - window].close;
        if !(reference > 0.0) || !last.is_finite() {
            return None;
        }

        let trend_pct = (last - reference) / reference * 100.0;
        let band = self.config.bias_threshold_pct;
        let bias = if trend_pct > band {
            Bias::Bullish
        } else if trend_pct < -band {
            Bias::Bearish
        } else {
            Bias::Neutral
        };
        let confidence = (trend_pct.abs() / (4.0 * band)).min(1.0);

        Some(TimeframeSummary {
            interval: interval.to_string(),
            trend_pct,
            bias,
            confidence,
            close: last,
            indicators: compute_snapshot(candles, &self.indicators),
        })
    }
}
