use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::repo::BackendKind;
use crate::types::DEFAULT_TICKERS;

/// Market simulation tuning parameters.
///
/// Defaults match the hosted job: one tick per second, a day of history,
/// the document store as source of truth and the path tree as replica.
/// Every field can be overridden from the environment (see [`Config::from_env`]).
#[derive(Debug, Clone)]
pub struct Config {
    // Minimum spacing between tick starts.
    pub tick_ms: u64,

    // History older than this is pruned on every write.
    pub history_expiry_ms: u64,

    // The fixed universe. Deduplicated, first occurrence wins.
    pub tickers: Vec<String>,

    // Every backend here receives every write.
    pub backends: Vec<BackendKind>,

    // The only backend read for the current price. Must be in `backends`.
    pub canonical: BackendKind,

    // Where the scheduler record lives. None keeps it in memory.
    pub state_path: Option<PathBuf>,

    // Backend snapshots go here as <backend>.json. None keeps prices in memory only.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            history_expiry_ms: 24 * 60 * 60 * 1000,

            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),

            backends: vec![BackendKind::Document, BackendKind::Tree],
            canonical: BackendKind::Document,

            state_path: Some(PathBuf::from("machine.json")),
            data_dir: Some(PathBuf::from("data")),
        }
    }
}

impl Config {
    /// Defaults overlaid with `STOCKS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Config::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = var("STOCKS_TICK_MS") {
            cfg.tick_ms = v.trim().parse().context("STOCKS_TICK_MS")?;
        }
        if let Some(v) = var("STOCKS_HISTORY_EXPIRY_MS") {
            cfg.history_expiry_ms = v.trim().parse().context("STOCKS_HISTORY_EXPIRY_MS")?;
        }
        if let Some(v) = var("STOCKS_TICKERS") {
            cfg.tickers = split_list(&v);
        }
        if let Some(v) = var("STOCKS_BACKENDS") {
            cfg.backends = split_list(&v)
                .iter()
                .map(|s| s.parse())
                .collect::<Result<_>>()
                .context("STOCKS_BACKENDS")?;
        }
        if let Some(v) = var("STOCKS_CANONICAL") {
            cfg.canonical = v.parse().context("STOCKS_CANONICAL")?;
        }
        if let Some(v) = var("STOCKS_STATE_PATH") {
            cfg.state_path = path_or_memory(&v);
        }
        if let Some(v) = var("STOCKS_DATA_DIR") {
            cfg.data_dir = path_or_memory(&v);
        }

        cfg.tickers = dedup_tickers(cfg.tickers);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("tick_ms must be positive");
        }
        if self.history_expiry_ms == 0 {
            bail!("history_expiry_ms must be positive");
        }
        if self.tickers.is_empty() {
            bail!("ticker universe is empty");
        }
        if self.backends.is_empty() {
            bail!("no storage backends configured");
        }
        if !self.backends.contains(&self.canonical) {
            bail!(
                "canonical backend {} is not in the write set {:?}",
                self.canonical,
                self.backends
            );
        }
        Ok(())
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }

    pub fn history_expiry(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.history_expiry_ms as i64)
    }
}

fn path_or_memory(raw: &str) -> Option<PathBuf> {
    match raw.trim() {
        ":memory:" => None,
        p => Some(PathBuf::from(p)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drops repeated symbols, keeping first-occurrence order.
pub fn dedup_tickers(tickers: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tickers
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
