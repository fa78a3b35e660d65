//! Collaborator implementations for live and offline sessions.
//!
//! - [`binance`]: exchange REST klines behind a circuit breaker
//! - [`synthetic`]: seeded random walk, no network
//! - [`csv_replay`]: candles replayed from a CSV file
//! - [`paper`]: simulated fills at the latest close
//! - [`sentiment`]: Fear & Greed index and a fixed reading

pub mod binance;
pub mod csv_replay;
pub mod paper;
pub mod sentiment;
pub mod synthetic;

pub use binance::BinanceProvider;
pub use csv_replay::CsvReplay;
pub use paper::PaperExecutor;
pub use sentiment::{FearGreedProvider, StaticSentiment};
pub use synthetic::SyntheticMarket;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use tradeloop_core::domain::Candle;
use tradeloop_core::ports::ProviderError;

use crate::circuit_breaker::CircuitBreaker;

/// Length of a kline interval such as `"5m"`, `"1h"` or `"1d"`.
pub fn interval_duration(interval: &str) -> Option<chrono::Duration> {
    let interval = interval.trim();
    let split = interval.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = interval.split_at(split);
    let amount: i64 = amount.parse().ok().filter(|n| *n > 0)?;
    match unit {
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        "d" => Some(chrono::Duration::days(amount)),
        "w" => Some(chrono::Duration::weeks(amount)),
        _ => None,
    }
}

/// Build the last `limit` candles of `interval` from a base-interval series.
/// Coarser intervals must be whole multiples of the base.
pub(crate) fn resample(
    base: &[Candle],
    base_interval: &str,
    base_step: chrono::Duration,
    interval: &str,
    limit: usize,
) -> Result<Vec<Candle>, ProviderError> {
    let step = interval_duration(interval)
        .ok_or_else(|| ProviderError::Rejected(format!("unsupported interval: {interval}")))?;
    let base_secs = base_step.num_seconds().max(1);
    let ratio = step.num_seconds() / base_secs;
    if ratio < 1 || step.num_seconds() % base_secs != 0 {
        return Err(ProviderError::Rejected(format!(
            "cannot build {interval} candles from {base_interval} data"
        )));
    }
    let series = if ratio == 1 {
        base.to_vec()
    } else {
        aggregate(base, ratio as usize)
    };
    let from = series.len().saturating_sub(limit.max(1));
    Ok(series[from..].to_vec())
}

/// Merge consecutive groups of `factor` candles into one, aligned so the
/// newest group ends on the newest candle.
pub(crate) fn aggregate(candles: &[Candle], factor: usize) -> Vec<Candle> {
    let skip = candles.len() % factor;
    candles[skip..]
        .chunks(factor)
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            Some(Candle {
                timestamp: first.timestamp,
                open: first.open,
                high: group.iter().map(|c| c.high).fold(f64::MIN, f64::max),
                low: group.iter().map(|c| c.low).fold(f64::MAX, f64::min),
                close: last.close,
                volume: group.iter().map(|c| c.volume).sum(),
            })
        })
        .collect()
}

/// Blocking JSON GET with exponential backoff and circuit-breaker bookkeeping.
///
/// 403 trips the breaker, 429 and 5xx count as failures and are retried,
/// 4xx otherwise is a rejection. Connect and timeout errors are retried.
pub(crate) struct JsonFetcher {
    client: reqwest::blocking::Client,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl JsonFetcher {
    pub(crate) fn new(
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tradeloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Io(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            breaker,
            max_retries,
            base_delay: Duration::from_millis(500),
        })
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let mut last_error = ProviderError::DataUnavailable(format!("no attempt made for {url}"));

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            if !self.breaker.is_allowed() {
                return Err(ProviderError::CircuitOpen);
            }

            debug!(url, attempt, "GET");
            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    self.breaker.record_failure();
                    last_error = ProviderError::Timeout(e.to_string());
                    continue;
                }
                Err(e) if e.is_connect() => {
                    self.breaker.record_failure();
                    last_error = ProviderError::DataUnavailable(e.to_string());
                    continue;
                }
                Err(e) => return Err(ProviderError::Io(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.breaker.trip();
                return Err(ProviderError::CircuitOpen);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                warn!(url, retry_after_secs = ?retry_after, "rate limited");
                last_error = ProviderError::Rejected(format!("rate limited (HTTP 429) for {url}"));
                continue;
            }
            if status.is_server_error() {
                self.breaker.record_failure();
                last_error = ProviderError::DataUnavailable(format!("HTTP {status} for {url}"));
                continue;
            }
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                return Err(ProviderError::Rejected(format!("HTTP {status}: {body}")));
            }

            let parsed = resp
                .json::<T>()
                .map_err(|e| ProviderError::Parse(format!("unexpected response from {url}: {e}")))?;
            self.breaker.record_success();
            return Ok(parsed);
        }

        Err(last_error)
    }
}
