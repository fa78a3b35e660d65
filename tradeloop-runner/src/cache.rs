//! In-memory TTL cache and the caching sentiment wrapper built on it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use tradeloop_core::domain::SentimentReading;
use tradeloop_core::ports::{ProviderError, SentimentProvider};

/// Values expire `ttl` after insertion. Expired entries stay until
/// overwritten so callers can still fall back to them.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, (Instant, V)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock()
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    /// The cached value regardless of age, if no older than `max_age`.
    pub fn get_stale(&self, key: &K, max_age: Duration) -> Option<V> {
        self.lock()
            .get(key)
            .filter(|(at, _)| at.elapsed() < max_age)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.lock().insert(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sentiment readings cached per symbol. When the inner provider fails, a
/// reading up to `stale_limit` old is served instead of the error.
pub struct CachedSentiment {
    inner: Arc<dyn SentimentProvider>,
    cache: TtlCache<String, SentimentReading>,
    stale_limit: Duration,
}

impl CachedSentiment {
    pub fn new(inner: Arc<dyn SentimentProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
            stale_limit: ttl * 4,
        }
    }

    pub fn with_stale_limit(mut self, stale_limit: Duration) -> Self {
        self.stale_limit = stale_limit;
        self
    }
}

impl SentimentProvider for CachedSentiment {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compiled_score(&self, symbol: &str) -> Result<SentimentReading, ProviderError> {
        let key = symbol.to_string();
        if let Some(hit) = self.cache.get(&key) {
            debug!(symbol, "sentiment cache hit");
            return Ok(hit);
        }
        match self.inner.compiled_score(symbol) {
            Ok(reading) => {
                self.cache.insert(key, reading);
                Ok(reading)
            }
            Err(e) => match self.cache.get_stale(&key, self.stale_limit) {
                Some(stale) => {
                    warn!(symbol, error = %e, "sentiment fetch failed, serving stale reading");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}
