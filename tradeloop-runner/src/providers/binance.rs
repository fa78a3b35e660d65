//! Binance spot klines over the public REST API.
//!
//! Only market data is fetched here; orders go through the paper executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tradeloop_core::domain::Candle;
use tradeloop_core::ports::{MarketDataProvider, ProviderError};

use super::JsonFetcher;
use crate::circuit_breaker::CircuitBreaker;

pub const MAINNET_URL: &str = "https://api.binance.com";
pub const TESTNET_URL: &str = "https://testnet.binance.vision";

/// Upper bound the exchange accepts for `limit`.
const MAX_LIMIT: usize = 1000;

pub struct BinanceProvider {
    base_url: String,
    fetcher: JsonFetcher,
}

impl BinanceProvider {
    pub fn new(
        base_url: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetcher: JsonFetcher::new(breaker, timeout, 3)?,
        })
    }

    fn klines_url(&self, symbol: &str, interval: &str, limit: usize) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={interval}&limit={}",
            self.base_url,
            symbol.to_ascii_uppercase(),
            limit.clamp(1, MAX_LIMIT)
        )
    }
}

/// Each kline is a JSON array: `[open_time_ms, "open", "high", "low",
/// "close", "volume", close_time_ms, ...]`. Prices arrive as strings.
pub(crate) fn parse_klines(rows: &[Vec<Value>]) -> Result<Vec<Candle>, ProviderError> {
    fn number(row: &[Value], idx: usize) -> Result<f64, ProviderError> {
        let value = row
            .get(idx)
            .ok_or_else(|| ProviderError::Parse(format!("kline has no field {idx}")))?;
        match value {
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|e| ProviderError::Parse(format!("kline field {idx}: {e}"))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ProviderError::Parse(format!("kline field {idx} out of range"))),
            other => Err(ProviderError::Parse(format!(
                "kline field {idx} has unexpected type: {other}"
            ))),
        }
    }

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let open_ms = row
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::Parse("kline open time missing".into()))?;
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(open_ms)
            .ok_or_else(|| ProviderError::Parse(format!("invalid kline timestamp: {open_ms}")))?;
        candles.push(Candle {
            timestamp,
            open: number(row, 1)?,
            high: number(row, 2)?,
            low: number(row, 3)?,
            close: number(row, 4)?,
            volume: number(row, 5)?,
        });
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let rows: Vec<Vec<Value>> = self.fetcher.get(&self.klines_url(symbol, interval, limit))?;
        let candles = parse_klines(&rows)?;
        if candles.is_empty() {
            return Err(ProviderError::DataUnavailable(format!(
                "no {interval} klines returned for {symbol}"
            )));
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> BinanceProvider {
        let breaker = Arc::new(CircuitBreaker::for_exchange("binance"));
        BinanceProvider::new(TESTNET_URL, breaker, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn builds_klines_url() {
        let url = provider().klines_url("btcusdt", "5m", 200);
        assert_eq!(
            url,
            "https://testnet.binance.vision/api/v3/klines?symbol=BTCUSDT&interval=5m&limit=200"
        );
    }

    #[test]
    fn limit_is_clamped_to_exchange_maximum() {
        let url = provider().klines_url("BTCUSDT", "1h", 5000);
        assert!(url.ends_with("limit=1000"));
    }

    #[test]
    fn parses_string_prices() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            [1_700_000_300_000_i64, "101.0", "102.5", "100.5", "102.0", "12.5", 1_700_000_599_999_i64],
            [1_700_000_000_000_i64, "100.0", "101.5", "99.5", "101.0", "10.0", 1_700_000_299_999_i64]
        ]))
        .unwrap();
        let candles = parse_klines(&rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[1].close, 102.0);
        assert!(candles[0].timestamp < candles[1].timestamp);
    }

    #[test]
    fn malformed_kline_is_a_parse_error() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_value(json!([[1_700_000_000_000_i64, "abc", "1", "1", "1", "1"]]))
                .unwrap();
        assert!(matches!(parse_klines(&rows), Err(ProviderError::Parse(_))));

        let short: Vec<Vec<Value>> =
            serde_json::from_value(json!([[1_700_000_000_000_i64, "1.0"]])).unwrap();
        assert!(matches!(parse_klines(&short), Err(ProviderError::Parse(_))));
    }
}
