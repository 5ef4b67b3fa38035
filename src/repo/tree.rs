//! Path tree store: a flat map of slash-separated paths to JSON values.
//!
//! Layout:
//!
//! ```text
//! stocks-live/<ticker>               {"price": 10.0, "time": 1700000000000}
//! stocks-history/<ticker>/<millis>   {"price": 10.0, "time": 1700000000000, "revTime": -1700000000000}
//! ```
//!
//! `revTime` is the negated timestamp so history can be scanned newest
//! first; retention cleanup is a range query over it.

use async_trait::async_trait;
use chrono::Duration;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::repo::{read_snapshot, to_time, write_snapshot, StockRepository};
use crate::types::{HistoryRecord, StockPrice};

const LIVE_ROOT: &str = "stocks-live";
const HISTORY_ROOT: &str = "stocks-history";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    price: f64,
    time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rev_time: Option<i64>,
}

pub struct PathTree {
    nodes: RwLock<BTreeMap<String, Value>>,
    history_expiry: Duration,
    clock: Arc<dyn Clock>,
    snapshot: Option<PathBuf>,
}

impl PathTree {
    pub fn new(history_expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            history_expiry,
            clock,
            snapshot: None,
        }
    }

    /// Tree restored from the `{path: value}` map at `path` (empty if the
    /// file does not exist yet) and written back to it on every flush.
    pub async fn open(
        path: impl Into<PathBuf>,
        history_expiry: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let nodes: BTreeMap<String, Value> = read_snapshot(&path).await?.unwrap_or_default();
        info!(path = %path.display(), nodes = nodes.len(), "tree store opened");

        Ok(Self {
            nodes: RwLock::new(nodes),
            history_expiry,
            clock,
            snapshot: Some(path),
        })
    }

    pub async fn get(&self, path: &str) -> Option<Value> {
        self.nodes.read().await.get(path).cloned()
    }

    pub async fn set(&self, path: String, value: Value) {
        self.nodes.write().await.insert(path, value);
    }

    pub async fn remove(&self, path: &str) -> bool {
        self.nodes.write().await.remove(path).is_some()
    }

    /// Direct children of `parent`, in path order.
    pub async fn children(&self, parent: &str) -> Vec<(String, Value)> {
        let prefix = format!("{parent}/");
        let nodes = self.nodes.read().await;
        nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// History entries for `ticker` ordered by `revTime`, i.e. newest first.
    async fn history_by_rev_time(&self, ticker: &str) -> Result<Vec<(String, Entry)>, StoreError> {
        let mut out = Vec::new();
        for (path, value) in self.children(&history_path(ticker)).await {
            out.push((path.clone(), decode(&path, value)?));
        }
        out.sort_by_key(|(_, e)| e.rev_time.unwrap_or(-e.time));
        Ok(out)
    }
}

fn live_path(ticker: &str) -> String {
    format!("{LIVE_ROOT}/{ticker}")
}

fn history_path(ticker: &str) -> String {
    format!("{HISTORY_ROOT}/{ticker}")
}

fn decode(path: &str, value: Value) -> Result<Entry, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl StockRepository for PathTree {
    fn name(&self) -> &str {
        "tree"
    }

    async fn get_live_price(&self, ticker: &str) -> Result<Option<StockPrice>, StoreError> {
        let path = live_path(ticker);
        let Some(value) = self.get(&path).await else {
            return Ok(None);
        };
        let entry = decode(&path, value)?;
        Ok(Some(StockPrice::new(entry.price, to_time(&path, entry.time)?)))
    }

    async fn update_price(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError> {
        let time = price.time.timestamp_millis();
        let live = serde_json::to_value(Entry {
            price: price.price,
            time,
            rev_time: None,
        })?;
        let hist = serde_json::to_value(Entry {
            price: price.price,
            time,
            rev_time: Some(-time),
        })?;
        let hist_path = format!("{}/{}", history_path(ticker), price.history_id());

        tokio::try_join!(
            async {
                self.set(live_path(ticker), live).await;
                Ok::<_, StoreError>(())
            },
            async {
                self.set(hist_path, hist).await;
                Ok::<_, StoreError>(())
            },
            self.delete_expired_history(ticker),
        )?;
        Ok(())
    }

    async fn history(&self, ticker: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut out = Vec::new();
        for (path, entry) in self.history_by_rev_time(ticker).await?.into_iter().rev() {
            out.push(HistoryRecord {
                price: entry.price,
                time: to_time(&path, entry.time)?,
            });
        }
        Ok(out)
    }

    async fn delete_expired_history(&self, ticker: &str) -> Result<usize, StoreError> {
        let expired = (self.clock.now() - self.history_expiry).timestamp_millis();

        // orderBy revTime, startAt -expired: everything at or before the cutoff.
        let doomed: Vec<String> = self
            .history_by_rev_time(ticker)
            .await?
            .into_iter()
            .filter(|(_, e)| e.rev_time.unwrap_or(-e.time) >= -expired)
            .map(|(path, _)| path)
            .collect();

        let removed = join_all(doomed.iter().map(|p| self.remove(p)))
            .await
            .into_iter()
            .filter(|r| *r)
            .count();
        if removed > 0 {
            debug!(ticker, removed, "pruned tree history");
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let nodes = self.nodes.read().await.clone();
        write_snapshot(path, &nodes).await
    }
}
