//! Storage backends for live prices and price history.
//!
//! Every backend implements [`StockRepository`]. One backend is the
//! canonical source for reads; all configured backends receive every write.
//! There is no transaction across backends: a failed write on one leaves the
//! others as they are.
//!
//! Stores live in memory. When opened with a snapshot file they load it on
//! start and rewrite it on [`StockRepository::flush`], once per tick.

pub mod document;
pub mod tree;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::StoreError;
use crate::types::{HistoryRecord, StockPrice};

pub use document::DocumentStore;
pub use tree::PathTree;

#[async_trait]
pub trait StockRepository: Send + Sync {
    fn name(&self) -> &str;

    async fn get_live_price(&self, ticker: &str) -> Result<Option<StockPrice>, StoreError>;

    /// Overwrites the live record, appends a history record keyed by
    /// `price.time`, and prunes expired history, all issued together.
    async fn update_price(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError>;

    /// Retained history for `ticker`, oldest first.
    async fn history(&self, ticker: &str) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Deletes history whose age has reached the expiry. Returns how many
    /// records were removed.
    async fn delete_expired_history(&self, ticker: &str) -> Result<usize, StoreError>;

    /// Persists everything written so far. No-op for memory-only stores.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Document-per-ticker store with a history subcollection.
    Document,
    /// Flat path-addressed tree.
    Tree,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Document => "document",
            BackendKind::Tree => "tree",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "firestore" => Ok(BackendKind::Document),
            "tree" | "rtdb" => Ok(BackendKind::Tree),
            other => Err(anyhow!("unknown backend {other:?}")),
        }
    }
}

/// The read source plus the full write set.
#[derive(Clone)]
pub struct Backends {
    pub canonical: Arc<dyn StockRepository>,
    pub writers: Vec<Arc<dyn StockRepository>>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let writers: Vec<&str> = self.writers.iter().map(|w| w.name()).collect();
        f.debug_struct("Backends")
            .field("canonical", &self.canonical.name())
            .field("writers", &writers)
            .finish()
    }
}

impl Backends {
    /// `canonical` is expected to also appear in `writers`.
    pub fn new(canonical: Arc<dyn StockRepository>, writers: Vec<Arc<dyn StockRepository>>) -> Self {
        Self { canonical, writers }
    }

    /// Builds one store per configured backend kind. With a data directory
    /// each store is restored from, and flushed to, `<dir>/<kind>.json`.
    pub async fn from_config(cfg: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        cfg.validate()?;
        let expiry = cfg.history_expiry();

        if let Some(dir) = &cfg.data_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create data dir {}", dir.display()))?;
        }
        let snapshot = |kind: BackendKind| -> Option<PathBuf> {
            cfg.data_dir
                .as_ref()
                .map(|dir| dir.join(format!("{kind}.json")))
        };

        let mut writers: Vec<Arc<dyn StockRepository>> = Vec::with_capacity(cfg.backends.len());
        let mut canonical = None;
        for kind in &cfg.backends {
            let repo: Arc<dyn StockRepository> = match (kind, snapshot(*kind)) {
                (BackendKind::Document, None) => {
                    Arc::new(DocumentStore::new(expiry, clock.clone()))
                }
                (BackendKind::Document, Some(path)) => Arc::new(
                    DocumentStore::open(path, expiry, clock.clone())
                        .await
                        .context("open document store")?,
                ),
                (BackendKind::Tree, None) => Arc::new(PathTree::new(expiry, clock.clone())),
                (BackendKind::Tree, Some(path)) => Arc::new(
                    PathTree::open(path, expiry, clock.clone())
                        .await
                        .context("open tree store")?,
                ),
            };
            if *kind == cfg.canonical && canonical.is_none() {
                canonical = Some(repo.clone());
            }
            writers.push(repo);
        }

        let canonical =
            canonical.ok_or_else(|| anyhow!("canonical backend {} not built", cfg.canonical))?;
        Ok(Self::new(canonical, writers))
    }
}

pub(crate) fn to_time(path: &str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt {
            path: path.to_string(),
            reason: format!("timestamp {ms} out of range"),
        })
}

/// Reads a JSON snapshot. A missing file means an empty store.
pub(crate) async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Replaces a JSON snapshot through a temp file and rename.
pub(crate) async fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let io = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::write(&tmp, bytes).await.map_err(io)?;
    tokio::fs::rename(&tmp, path).await.map_err(io)?;
    Ok(())
}
