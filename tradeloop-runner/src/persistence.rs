//! JSON file state store.
//!
//! Layout under the state directory:
//! - `state.json`: risk state and open position, rewritten atomically
//!   (write to `state.json.tmp`, then rename)
//! - `trades.jsonl`: one closed trade per line, append-only

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use tradeloop_core::domain::TradeRecord;
use tradeloop_core::ports::{PersistedState, ProviderError, StateStore};

pub const STATE_FILE: &str = "state.json";
pub const TRADES_FILE: &str = "trades.jsonl";

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Io(format!("{}: {e}", path.display()))
}

impl JsonStateStore {
    /// Creates the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn trades_path(&self) -> PathBuf {
        self.dir.join(TRADES_FILE)
    }
}

impl StateStore for JsonStateStore {
    fn load_state(&self) -> Result<Option<PersistedState>, ProviderError> {
        let path = self.state_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| ProviderError::Parse(format!("{}: {e}", path.display())))
    }

    fn save_state(&self, state: &PersistedState) -> Result<(), ProviderError> {
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ProviderError::Parse(format!("serialize state: {e}")))?;
        fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))
    }

    fn append_trade(&self, trade: &TradeRecord) -> Result<(), ProviderError> {
        let path = self.trades_path();
        let json = serde_json::to_string(trade)
            .map_err(|e| ProviderError::Parse(format!("serialize trade: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        writeln!(file, "{json}").map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))
    }

    /// Malformed lines are skipped with a warning. Duplicate ids keep the
    /// first occurrence.
    fn load_trades(&self) -> Result<Vec<TradeRecord>, ProviderError> {
        let path = self.trades_path();
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path, e)),
        };

        let mut seen = HashSet::new();
        let mut trades = Vec::new();
        for (lineno, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_err(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(trade) => {
                    if seen.insert(trade.id.clone()) {
                        trades.push(trade);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed trade record");
                }
            }
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tradeloop_core::domain::{CloseReason, Position, PositionSide};
    use tradeloop_core::risk::RiskState;

    fn trade(minute: u32, exit: f64) -> TradeRecord {
        let opened = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2024, 1, 2, 10, minute, 0).unwrap();
        let position = Position::from_fill("BTCUSDT", PositionSide::Long, 100.0, 1.0, 0.01, 0.02, opened);
        TradeRecord::close(&position, exit, closed, CloseReason::TakeProfit)
    }

    #[test]
    fn missing_files_mean_fresh_start() {
        let tmp = TempDir::new().unwrap();
        let store = JsonStateStore::open(tmp.path().join("state")).unwrap();
        assert!(store.load_state().unwrap().is_none());
        assert!(store.load_trades().unwrap().is_empty());
    }

    #[test]
    fn state_is_replaced_atomically() {
        let tmp = TempDir::new().unwrap();
        let store = JsonStateStore::open(tmp.path()).unwrap();
        let opened = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let first = PersistedState {
            risk_state: RiskState::new(1000.0),
            open_position: Some(Position::from_fill(
                "BTCUSDT",
                PositionSide::Short,
                100.0,
                2.0,
                0.01,
                0.02,
                opened,
            )),
        };
        store.save_state(&first).unwrap();
        let second = PersistedState {
            risk_state: RiskState::new(990.0),
            open_position: None,
        };
        store.save_state(&second).unwrap();

        assert_eq!(store.load_state().unwrap(), Some(second));
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn duplicate_appends_are_collapsed() {
        let tmp = TempDir::new().unwrap();
        let store = JsonStateStore::open(tmp.path()).unwrap();
        let a = trade(5, 102.0);
        let b = trade(9, 99.0);
        store.append_trade(&a).unwrap();
        store.append_trade(&a).unwrap();
        store.append_trade(&b).unwrap();

        let trades = store.load_trades().unwrap();
        assert_eq!(trades, vec![a, b]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = JsonStateStore::open(tmp.path()).unwrap();
        store.append_trade(&trade(5, 102.0)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(store.trades_path()).unwrap();
            writeln!(file, "{{not json").unwrap();
            writeln!(file).unwrap();
        }
        store.append_trade(&trade(7, 101.0)).unwrap();
        assert_eq!(store.load_trades().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_state_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let store = JsonStateStore::open(tmp.path()).unwrap();
        fs::write(store.state_path(), "{").unwrap();
        assert!(matches!(store.load_state(), Err(ProviderError::Parse(_))));
    }
}
