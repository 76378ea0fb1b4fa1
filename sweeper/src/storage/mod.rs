// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable sweeper state: the scan checkpoint, the set of deposits already
//! acted upon, and running statistics.
//!
//! Three backends implement [`Storage`]: [`memory::MemoryStorage`] (process
//! lifetime only), [`file::FileStorage`] (one JSON document) and
//! [`rest_kv::RestKvStorage`] (a Redis-compatible REST service with TTLs).

pub mod file;
pub mod memory;
pub mod rest_kv;

use crate::config::StorageConfig;
use crate::error::SweeperResult;
use crate::types::{Statistics, StatsUpdate};
use async_trait::async_trait;
use ethers::types::TxHash;
use serde::{Deserialize, Serialize};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub const DEFAULT_MAX_PROCESSED: usize = 1000;

#[async_trait]
pub trait Storage: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Highest fully scanned block, 0 when never set.
    async fn get_checkpoint(&self) -> SweeperResult<u64>;

    /// Persists the checkpoint. Keeping it monotonic is up to the caller.
    async fn set_checkpoint(&self, height: u64) -> SweeperResult<()>;

    async fn is_processed(&self, tx_hash: &TxHash) -> SweeperResult<bool>;

    /// Idempotent insert into the processed set.
    async fn mark_processed(&self, tx_hash: &TxHash) -> SweeperResult<()>;

    /// Atomically marks `tx_hash` as processed. Returns `true` only for the
    /// first caller.
    async fn claim(&self, tx_hash: &TxHash) -> SweeperResult<bool>;

    /// Drops `tx_hash` from the processed set so a later cycle can retry it.
    async fn release(&self, tx_hash: &TxHash) -> SweeperResult<()>;

    async fn get_stats(&self) -> SweeperResult<Statistics>;

    /// Merges `update` into the stored statistics and returns the result.
    async fn update_stats(&self, update: StatsUpdate) -> SweeperResult<Statistics>;

    async fn info(&self) -> SweeperResult<StorageInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub backend: String,
    pub last_checked_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<usize>,
    pub stats: Statistics,
}

/// On-disk layout of the file backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub last_checked_block: u64,
    #[serde(default)]
    pub processed_transactions: Vec<String>,
    #[serde(default)]
    pub stats: Statistics,
}

/// Bounded set of processed transaction hashes. Once full, the least
/// recently inserted entry is evicted for each new one. Lookups do not
/// refresh an entry's position.
#[derive(Debug, Clone)]
pub struct ProcessedSet {
    cache: LruCache<String, ()>,
}

impl ProcessedSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Rebuilds a set from persisted entries, oldest first. Entries beyond
    /// the capacity are dropped from the front.
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = String>) -> Self {
        let mut set = Self::new(capacity);
        for entry in entries {
            set.insert(entry);
        }
        set
    }

    /// Returns `false` when `key` was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.cache.contains(&key) {
            return false;
        }
        self.cache.push(key, ());
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.cache.pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Oldest first, the order [`ProcessedSet::from_entries`] expects.
    pub fn entries(&self) -> Vec<String> {
        self.cache.iter().rev().map(|(key, _)| key.clone()).collect()
    }
}

pub fn build_storage(config: &StorageConfig) -> SweeperResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config {
        StorageConfig::Memory { max_processed } => {
            tracing::warn!(
                "[Storage] Using in-memory storage, state is lost when the process exits"
            );
            Arc::new(memory::MemoryStorage::new(*max_processed))
        }
        StorageConfig::File {
            path,
            max_processed,
        } => Arc::new(file::FileStorage::open(path.clone(), *max_processed)?),
        StorageConfig::RestKv {
            url,
            token,
            ttl_secs,
        } => Arc::new(rest_kv::RestKvStorage::new(
            url.clone(),
            token.clone(),
            *ttl_secs,
        )?),
    };
    tracing::info!("[Storage] Backend: {}", storage.backend());
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_set_evicts_oldest() {
        let mut set = ProcessedSet::new(500);
        for i in 0..501 {
            assert!(set.insert(format!("tx{}", i)));
        }
        assert_eq!(set.len(), 500);
        assert!(!set.contains("tx0"));
        assert!(set.contains("tx1"));
        assert!(set.contains("tx500"));
    }

    #[test]
    fn test_processed_set_duplicate_insert() {
        let mut set = ProcessedSet::new(2);
        assert!(set.insert("a".into()));
        assert!(!set.insert("a".into()));
        assert!(set.insert("b".into()));
        // re-inserting an existing entry does not refresh its position
        assert!(!set.insert("a".into()));
        assert!(set.insert("c".into()));
        assert!(!set.contains("a"));
        assert_eq!(set.entries(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_processed_set_remove_and_restore() {
        let mut set = ProcessedSet::from_entries(
            2,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(set.entries(), vec!["b".to_string(), "c".to_string()]);
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert_eq!(set.len(), 1);
        assert!(set.insert("b".into()));
        assert_eq!(set.entries(), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_processed_set_lookup_keeps_eviction_order() {
        let mut set = ProcessedSet::new(2);
        assert!(set.insert("a".into()));
        assert!(set.insert("b".into()));
        assert!(set.contains("a"));
        assert!(set.insert("c".into()));
        assert!(!set.contains("a"));
        assert!(set.contains("b"));

        let zero = ProcessedSet::from_entries(0, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(zero.entries(), vec!["y".to_string()]);
    }

    #[test]
    fn test_persisted_state_layout() {
        let state: PersistedState = serde_json::from_str(
            r#"{"lastCheckedBlock": 12, "processedTransactions": ["0x01"], "stats": {"totalChecks": 3}}"#,
        )
        .unwrap();
        assert_eq!(state.last_checked_block, 12);
        assert_eq!(state.processed_transactions, vec!["0x01".to_string()]);
        assert_eq!(state.stats.total_checks, 3);
        assert_eq!(state.stats.last_check, None);

        let empty: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, PersistedState::default());
    }
}
