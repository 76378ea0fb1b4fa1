// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{PersistedState, ProcessedSet, Storage, StorageInfo};
use crate::error::{SweeperError, SweeperResult};
use crate::types::{tx_key, Statistics, StatsUpdate};
use async_trait::async_trait;
use ethers::types::TxHash;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Clone)]
struct FileState {
    last_checked_block: u64,
    processed: ProcessedSet,
    stats: Statistics,
}

impl FileState {
    fn to_persisted(&self) -> PersistedState {
        PersistedState {
            last_checked_block: self.last_checked_block,
            processed_transactions: self.processed.entries(),
            stats: self.stats.clone(),
        }
    }
}

/// Single JSON document on local disk. Every mutation is written to a
/// temporary file, flushed to disk and renamed over the original before
/// returning. Only one process may use a given file.
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStorage {
    pub fn open(path: PathBuf, max_processed: usize) -> SweeperResult<Self> {
        let persisted = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                SweeperError::StorageError(format!("Failed to read state file {:?}: {}", path, e))
            })?;
            serde_json::from_str::<PersistedState>(&contents).map_err(|e| {
                SweeperError::StorageError(format!("Failed to parse state file {:?}: {}", path, e))
            })?
        } else {
            PersistedState::default()
        };
        tracing::info!(
            "[FileStorage] Loaded {:?}: last checked block {}, {} processed transactions",
            path,
            persisted.last_checked_block,
            persisted.processed_transactions.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(FileState {
                last_checked_block: persisted.last_checked_block,
                processed: ProcessedSet::from_entries(
                    max_processed,
                    persisted.processed_transactions,
                ),
                stats: persisted.stats,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Writes and syncs the temporary file, renames it over the state file
    /// and syncs the directory so the rename itself survives a crash.
    fn persist(&self, state: &FileState) -> SweeperResult<()> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&state.to_persisted())?;
        let tmp = self.tmp_path();
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        #[cfg(unix)]
        std::fs::File::open(parent.unwrap_or_else(|| Path::new(".")))?.sync_all()?;
        Ok(())
    }

    /// Applies `f` to a copy of the state, persists it, then commits. The
    /// in-memory state is untouched when the write fails.
    async fn modify<R>(&self, f: impl FnOnce(&mut FileState) -> R) -> SweeperResult<R> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(result)
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get_checkpoint(&self) -> SweeperResult<u64> {
        Ok(self.state.lock().await.last_checked_block)
    }

    async fn set_checkpoint(&self, height: u64) -> SweeperResult<()> {
        self.modify(|s| s.last_checked_block = height).await
    }

    async fn is_processed(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        Ok(self.state.lock().await.processed.contains(&tx_key(tx_hash)))
    }

    async fn mark_processed(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        let key = tx_key(tx_hash);
        if self.is_processed(tx_hash).await? {
            return Ok(());
        }
        self.modify(|s| {
            s.processed.insert(key);
        })
        .await
    }

    async fn claim(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        let key = tx_key(tx_hash);
        let mut guard = self.state.lock().await;
        if guard.processed.contains(&key) {
            return Ok(false);
        }
        let mut next = guard.clone();
        next.processed.insert(key);
        self.persist(&next)?;
        *guard = next;
        Ok(true)
    }

    async fn release(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        let key = tx_key(tx_hash);
        self.modify(|s| {
            s.processed.remove(&key);
        })
        .await
    }

    async fn get_stats(&self) -> SweeperResult<Statistics> {
        Ok(self.state.lock().await.stats.clone())
    }

    async fn update_stats(&self, update: StatsUpdate) -> SweeperResult<Statistics> {
        self.modify(|s| {
            s.stats.merge(update);
            s.stats.clone()
        })
        .await
    }

    async fn info(&self) -> SweeperResult<StorageInfo> {
        let state = self.state.lock().await;
        Ok(StorageInfo {
            backend: self.backend().to_string(),
            last_checked_block: state.last_checked_block,
            processed_count: Some(state.processed.len()),
            stats: state.stats.clone(),
        })
    }
}
