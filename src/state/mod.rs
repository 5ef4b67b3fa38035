//! Persisted scheduler record (`{enabled, lastTick}`) and its change feed.
//!
//! Every write is published on a `watch` channel; the watch-mode driver
//! treats each publication as "run the next tick".

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::types::MachineState;

#[derive(Debug)]
pub struct MachineStateStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Option<MachineState>>,
    // Serializes read-modify-write sequences.
    write: Mutex<()>,
}

impl MachineStateStore {
    pub fn in_memory(initial: Option<MachineState>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            path: None,
            tx,
            write: Mutex::new(()),
        }
    }

    /// Opens a JSON-file-backed store. A missing file means "no state yet".
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial = read_file(&path).await?;
        let (tx, _) = watch::channel(initial);
        Ok(Self {
            path: Some(path),
            tx,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MachineState>> {
        self.tx.subscribe()
    }

    /// Current record. File-backed stores re-read the file so writes made
    /// by another process are seen; a change is published to subscribers.
    pub async fn load(&self) -> Result<Option<MachineState>> {
        let Some(path) = &self.path else {
            return Ok(*self.tx.borrow());
        };
        let state = read_file(path).await?;
        self.tx.send_if_modified(|cur| {
            if *cur != state {
                debug!(?state, "machine state changed on disk");
                *cur = state;
                true
            } else {
                false
            }
        });
        Ok(state)
    }

    pub async fn save(&self, state: MachineState) -> Result<()> {
        let _g = self.write.lock().await;
        self.persist(state).await
    }

    /// Flips `enabled`, creating the record if it does not exist.
    pub async fn set_enabled(&self, enabled: bool) -> Result<MachineState> {
        let _g = self.write.lock().await;
        let mut state = self.load().await?.unwrap_or_else(MachineState::enabled);
        state.enabled = enabled;
        self.persist(state).await?;
        Ok(state)
    }

    /// Records the start of a finished tick. `enabled` is re-read so a
    /// disable that landed mid-tick is kept.
    pub async fn commit_tick(&self, last_tick: i64) -> Result<Option<MachineState>> {
        let _g = self.write.lock().await;
        let Some(mut state) = self.load().await? else {
            return Ok(None);
        };
        state.last_tick = last_tick;
        self.persist(state).await?;
        Ok(Some(state))
    }

    async fn persist(&self, state: MachineState) -> Result<()> {
        if let Some(path) = &self.path {
            write_file(path, &state).await?;
        }
        self.tx.send_replace(Some(state));
        Ok(())
    }
}

async fn read_file(path: &Path) -> Result<Option<MachineState>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let state = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse machine state {}", path.display()))?;
            Ok(Some(state))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read machine state {}", path.display())),
    }
}

async fn write_file(path: &Path, state: &MachineState) -> Result<()> {
    let bytes = serde_json::to_vec(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replace machine state {}", path.display()))?;
    Ok(())
}
