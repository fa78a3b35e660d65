//! Offline market: a seeded geometric random walk per symbol.
//!
//! Each symbol has one base-interval walk. Coarser intervals are aggregated
//! from it. The newest candle only moves on `advance`; history a request
//! needs beyond what exists is generated backwards from the oldest candle.
//! Output depends only on the seed and the call sequence.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tradeloop_core::domain::Candle;
use tradeloop_core::ports::{MarketDataProvider, ProviderError};

use super::{interval_duration, resample};

struct Walk {
    rng: StdRng,
    step: Duration,
    max_move: f64,
    candles: Vec<Candle>,
}

impl Walk {
    /// Random high, low and volume around an open/close pair.
    fn dress(&mut self, timestamp: DateTime<Utc>, open: f64, close: f64) -> Candle {
        let wick_up: f64 = self.rng.gen_range(0.0..=self.max_move / 2.0);
        let wick_down: f64 = self.rng.gen_range(0.0..=self.max_move / 2.0);
        Candle {
            timestamp,
            open,
            high: open.max(close) * (1.0 + wick_up),
            low: (open.min(close) * (1.0 - wick_down)).max(0.005),
            close,
            volume: self.rng.gen_range(100.0..10_000.0),
        }
    }

    fn push_next(&mut self) {
        let Some(prev) = self.candles.last().copied() else {
            return;
        };
        let change: f64 = self.rng.gen_range(-self.max_move..=self.max_move);
        let close = (prev.close * (1.0 + change)).max(0.01);
        let candle = self.dress(prev.timestamp + self.step, prev.close, close);
        self.candles.push(candle);
    }

    /// Prepend `count` older candles, each closing where its successor opens.
    fn backfill(&mut self, count: usize) {
        let Some(oldest) = self.candles.first().copied() else {
            return;
        };
        let mut older = Vec::with_capacity(count + self.candles.len());
        let (mut next_open, mut next_ts) = (oldest.open, oldest.timestamp);
        for _ in 0..count {
            let change: f64 = self.rng.gen_range(-self.max_move..=self.max_move);
            let open = (next_open / (1.0 + change)).max(0.01);
            let timestamp = next_ts - self.step;
            older.push(self.dress(timestamp, open, next_open));
            next_open = open;
            next_ts = timestamp;
        }
        older.reverse();
        older.append(&mut self.candles);
        self.candles = older;
    }
}

pub struct SyntheticMarket {
    seed: u64,
    start_price: f64,
    /// Timestamp of the newest candle before the first advance.
    start: DateTime<Utc>,
    base_interval: String,
    base_step: Duration,
    /// Largest per-candle move as a fraction of price.
    max_move: f64,
    walks: Mutex<HashMap<String, Walk>>,
}

impl SyntheticMarket {
    pub fn new(
        seed: u64,
        start_price: f64,
        start: DateTime<Utc>,
        base_interval: &str,
    ) -> Result<Self, ProviderError> {
        let base_step = interval_duration(base_interval).ok_or_else(|| {
            ProviderError::Rejected(format!("unsupported interval: {base_interval}"))
        })?;
        Ok(Self {
            seed,
            start_price,
            start,
            base_interval: base_interval.to_string(),
            base_step,
            max_move: 0.03,
            walks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_max_move(mut self, max_move: f64) -> Self {
        self.max_move = max_move.abs().min(0.5);
        self
    }

    fn new_walk(&self, symbol: &str) -> Walk {
        let key = format!("{}|{symbol}|{}", self.seed, self.base_interval);
        let mut walk = Walk {
            rng: StdRng::from_seed(*blake3::hash(key.as_bytes()).as_bytes()),
            step: self.base_step,
            max_move: self.max_move,
            candles: Vec::new(),
        };
        let first = walk.dress(self.start, self.start_price, self.start_price);
        walk.candles.push(first);
        walk
    }

    fn with_walk<T>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut Walk) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut walks = self
            .walks
            .lock()
            .map_err(|_| ProviderError::Io("synthetic market lock poisoned".into()))?;
        let walk = walks
            .entry(symbol.to_string())
            .or_insert_with(|| self.new_walk(symbol));
        f(walk)
    }
}

impl MarketDataProvider for SyntheticMarket {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let step = interval_duration(interval)
            .ok_or_else(|| ProviderError::Rejected(format!("unsupported interval: {interval}")))?;
        let ratio = (step.num_seconds() / self.base_step.num_seconds().max(1)).max(1) as usize;
        let needed = limit.max(1) * ratio;
        self.with_walk(symbol, |walk| {
            if walk.candles.len() < needed {
                walk.backfill(needed - walk.candles.len());
            }
            resample(&walk.candles, &self.base_interval, self.base_step, interval, limit)
        })
    }

    fn advance(&self, symbol: &str) -> Result<(), ProviderError> {
        self.with_walk(symbol, |walk| {
            walk.push_next();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn market(seed: u64, price: f64) -> SyntheticMarket {
        SyntheticMarket::new(seed, price, start(), "5m").unwrap()
    }

    #[test]
    fn same_seed_same_walk() {
        let a = market(42, 100.0);
        let b = market(42, 100.0);
        assert_eq!(
            a.candles("BTCUSDT", "5m", 50).unwrap(),
            b.candles("BTCUSDT", "5m", 50).unwrap()
        );
    }

    #[test]
    fn different_seed_different_walk() {
        let a = market(1, 100.0);
        let b = market(2, 100.0);
        assert_ne!(
            a.candles("BTCUSDT", "5m", 50).unwrap(),
            b.candles("BTCUSDT", "5m", 50).unwrap()
        );
    }

    #[test]
    fn candles_are_sane_and_spaced_by_interval() {
        let market = market(7, 250.0);
        let candles = market.candles("ETHUSDT", "15m", 120).unwrap();
        assert_eq!(candles.len(), 120);
        assert!(candles.iter().all(Candle::is_sane));
        for pair in candles.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::minutes(15));
            assert!((pair[1].open - pair[0].close).abs() < 1e-9);
        }
    }

    #[test]
    fn newest_candle_is_anchored_at_start() {
        let market = market(7, 250.0);
        let short = market.candles("ETHUSDT", "5m", 3).unwrap();
        let long = market.candles("ETHUSDT", "1h", 50).unwrap();
        let again = market.candles("ETHUSDT", "5m", 3).unwrap();
        assert_eq!(short, again);
        assert_eq!(again[2].timestamp, start());
        assert_eq!(again[2].close, 250.0);
        assert_eq!(long.last().map(|c| c.close), Some(250.0));
    }

    #[test]
    fn reads_repeat_until_advance() {
        let market = market(7, 100.0);
        let first = market.candles("BTCUSDT", "5m", 10).unwrap();
        assert_eq!(market.candles("BTCUSDT", "5m", 10).unwrap(), first);

        market.advance("BTCUSDT").unwrap();
        let second = market.candles("BTCUSDT", "5m", 10).unwrap();
        assert_eq!(second.len(), 10);
        assert_eq!(second[8], first[9]);
        assert_eq!(second[9].timestamp - first[9].timestamp, Duration::minutes(5));
    }

    #[test]
    fn finer_than_base_is_rejected() {
        let market = market(7, 100.0);
        assert!(matches!(
            market.candles("BTCUSDT", "1m", 10),
            Err(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            market.candles("BTCUSDT", "7x", 10),
            Err(ProviderError::Rejected(_))
        ));
    }

    #[test]
    fn unknown_base_interval_is_rejected() {
        assert!(SyntheticMarket::new(7, 100.0, start(), "soon").is_err());
    }
}
