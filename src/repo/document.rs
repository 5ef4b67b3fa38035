//! Document store: one document per ticker in `stocks-live`, each with a
//! `recent-history` subcollection keyed by the timestamp string.

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::repo::{read_snapshot, to_time, write_snapshot, StockRepository};
use crate::types::{HistoryRecord, StockPrice};

const LIVE: &str = "stocks-live";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Document {
    price: f64,
    // Epoch millis.
    time: i64,
}

impl From<&StockPrice> for Document {
    fn from(p: &StockPrice) -> Self {
        Self {
            price: p.price,
            time: p.time.timestamp_millis(),
        }
    }
}

/// On-disk form of the whole store.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Snapshot {
    stocks_live: BTreeMap<String, Document>,
    recent_history: BTreeMap<String, BTreeMap<String, Document>>,
}

pub struct DocumentStore {
    live: DashMap<String, Document>,
    history: DashMap<String, BTreeMap<String, Document>>,
    history_expiry: Duration,
    clock: Arc<dyn Clock>,
    snapshot: Option<PathBuf>,
}

impl DocumentStore {
    pub fn new(history_expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            live: DashMap::new(),
            history: DashMap::new(),
            history_expiry,
            clock,
            snapshot: None,
        }
    }

    /// Store restored from `path` (empty if the file does not exist yet)
    /// and written back to it on every flush.
    pub async fn open(
        path: impl Into<PathBuf>,
        history_expiry: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let snap: Snapshot = read_snapshot(&path).await?.unwrap_or_default();
        info!(
            path = %path.display(),
            tickers = snap.stocks_live.len(),
            "document store opened"
        );

        let mut store = Self::new(history_expiry, clock);
        store.live = snap.stocks_live.into_iter().collect();
        store.history = snap.recent_history.into_iter().collect();
        store.snapshot = Some(path);
        Ok(store)
    }

    async fn set_live(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError> {
        // Merge semantics: the document only has these two fields.
        self.live.insert(ticker.to_string(), price.into());
        Ok(())
    }

    async fn add_history(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError> {
        self.history
            .entry(ticker.to_string())
            .or_default()
            .insert(price.history_id(), price.into());
        Ok(())
    }
}

#[async_trait]
impl StockRepository for DocumentStore {
    fn name(&self) -> &str {
        "document"
    }

    async fn get_live_price(&self, ticker: &str) -> Result<Option<StockPrice>, StoreError> {
        let Some(d) = self.live.get(ticker).map(|d| *d) else {
            return Ok(None);
        };
        let time = to_time(&format!("{LIVE}/{ticker}"), d.time)?;
        Ok(Some(StockPrice::new(d.price, time)))
    }

    async fn update_price(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError> {
        tokio::try_join!(
            self.set_live(ticker, price),
            self.add_history(ticker, price),
            self.delete_expired_history(ticker),
        )?;
        Ok(())
    }

    async fn history(&self, ticker: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let docs: Vec<(String, Document)> = match self.history.get(ticker) {
            Some(coll) => coll.iter().map(|(id, d)| (id.clone(), *d)).collect(),
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(docs.len());
        for (id, d) in docs {
            out.push(HistoryRecord {
                price: d.price,
                time: to_time(&format!("{LIVE}/{ticker}/recent-history/{id}"), d.time)?,
            });
        }
        out.sort_by_key(|r| r.time);
        Ok(out)
    }

    async fn delete_expired_history(&self, ticker: &str) -> Result<usize, StoreError> {
        let expired = (self.clock.now() - self.history_expiry).timestamp_millis();
        let Some(mut coll) = self.history.get_mut(ticker) else {
            return Ok(0);
        };
        let before = coll.len();
        coll.retain(|_, d| d.time > expired);
        let removed = before - coll.len();
        if removed > 0 {
            debug!(ticker, removed, "pruned document history");
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snap = Snapshot {
            stocks_live: self
                .live
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            recent_history: self
                .history
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        write_snapshot(path, &snap).await
    }
}
