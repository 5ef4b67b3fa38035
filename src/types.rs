use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price written for a ticker that has no live record yet.
pub const INITIAL_PRICE: f64 = 10.0;

/// No price ever drops below this.
pub const PRICE_FLOOR: f64 = 0.1;

/// The simulated market. Order is the order tickers are logged in.
pub const DEFAULT_TICKERS: [&str; 20] = [
    "HSTK", "FBAS", "QIX", "GORF", "ZAXN", "PCMN", "GLXN", "VGTA", "GOKU", "BLMA", "GOHN", "FRZA",
    "CELL", "BUU", "MCOY", "SPOK", "KIRK", "UHRA", "CHKV", "SULU",
];

/// Latest known price for one ticker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StockPrice {
    pub price: f64,
    pub time: DateTime<Utc>,
}

impl StockPrice {
    pub fn new(price: f64, time: DateTime<Utc>) -> Self {
        Self { price, time }
    }

    /// Key used for the history entry this price produces.
    pub fn history_id(&self) -> String {
        self.time.timestamp_millis().to_string()
    }
}

/// Immutable snapshot of a past price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryRecord {
    pub price: f64,
    pub time: DateTime<Utc>,
}

/// Persisted scheduler record.
///
/// Writing it is what drives the watch-mode scheduler; `enabled = false`
/// halts future ticks without cancelling one that is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    pub enabled: bool,
    /// UTC epoch millis of the start of the last committed tick.
    pub last_tick: i64,
}

impl MachineState {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            last_tick: 0,
        }
    }
}

/// What happened to one ticker during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No live price existed; the initial price was written.
    Initialized,
    /// Price moved and was written to every backend.
    Moved,
    /// Price did not move; nothing was written.
    Unchanged,
}
