//! Replay recorded candles from a CSV file.
//!
//! Expected header: `timestamp,open,high,low,close,volume` with RFC 3339
//! timestamps, one row per base-interval candle, oldest first. Each
//! `advance` releases one more candle; reads only see released candles and
//! coarser intervals are aggregated from them.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use tradeloop_core::domain::Candle;
use tradeloop_core::ports::{MarketDataProvider, ProviderError};

use super::{interval_duration, resample};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

pub struct CsvReplay {
    base_interval: String,
    base_step: chrono::Duration,
    candles: Vec<Candle>,
    /// Number of candles already released.
    cursor: Mutex<usize>,
}

impl CsvReplay {
    /// Load the file. `warmup` candles are visible before the first advance.
    pub fn from_path(
        path: &Path,
        base_interval: &str,
        warmup: usize,
    ) -> Result<Self, ProviderError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| ProviderError::Io(format!("{}: {e}", path.display())))?;
        let mut candles = Vec::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(|e| ProviderError::Parse(format!("{}: {e}", path.display())))?;
            let candle = Candle {
                timestamp: row.timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            };
            if candle.is_sane() {
                candles.push(candle);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "dropped insane candles from replay file");
        }
        info!(path = %path.display(), candles = candles.len(), "loaded replay candles");
        Self::from_candles(candles, base_interval, warmup)
    }

    pub fn from_candles(
        mut candles: Vec<Candle>,
        base_interval: &str,
        warmup: usize,
    ) -> Result<Self, ProviderError> {
        let base_step = interval_duration(base_interval).ok_or_else(|| {
            ProviderError::Rejected(format!("unsupported interval: {base_interval}"))
        })?;
        if candles.is_empty() {
            return Err(ProviderError::DataUnavailable("replay file has no candles".into()));
        }
        candles.sort_by_key(|c| c.timestamp);
        let cursor = warmup.min(candles.len());
        Ok(Self {
            base_interval: base_interval.to_string(),
            base_step,
            candles,
            cursor: Mutex::new(cursor),
        })
    }

    pub fn remaining(&self) -> usize {
        let released = self.cursor.lock().map(|c| *c).unwrap_or(self.candles.len());
        self.candles.len() - released
    }
}

impl MarketDataProvider for CsvReplay {
    fn name(&self) -> &str {
        "csv_replay"
    }

    fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let cursor = *self
            .cursor
            .lock()
            .map_err(|_| ProviderError::Io("replay cursor lock poisoned".into()))?;
        let series = resample(
            &self.candles[..cursor],
            &self.base_interval,
            self.base_step,
            interval,
            limit,
        )?;
        if series.is_empty() {
            return Err(ProviderError::DataUnavailable(format!(
                "no {interval} candles replayed yet for {symbol}"
            )));
        }
        Ok(series)
    }

    fn advance(&self, symbol: &str) -> Result<(), ProviderError> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| ProviderError::Io("replay cursor lock poisoned".into()))?;
        if *cursor >= self.candles.len() {
            return Err(ProviderError::DataUnavailable(format!(
                "replay for {symbol} exhausted after {} candles",
                self.candles.len()
            )));
        }
        *cursor += 1;
        Ok(())
    }
}
