// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{ProcessedSet, Storage, StorageInfo};
use crate::error::SweeperResult;
use crate::types::{tx_key, Statistics, StatsUpdate};
use async_trait::async_trait;
use ethers::types::TxHash;
use std::sync::Mutex;

struct MemoryState {
    last_checked_block: u64,
    processed: ProcessedSet,
    stats: Statistics,
}

/// Keeps everything in process memory. A restart rescans the recent window
/// and forgets which deposits were already forwarded.
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new(max_processed: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                last_checked_block: 0,
                processed: ProcessedSet::new(max_processed),
                stats: Statistics::default(),
            }),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_checkpoint(&self) -> SweeperResult<u64> {
        Ok(self.state.lock().unwrap().last_checked_block)
    }

    async fn set_checkpoint(&self, height: u64) -> SweeperResult<()> {
        self.state.lock().unwrap().last_checked_block = height;
        Ok(())
    }

    async fn is_processed(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        Ok(self.state.lock().unwrap().processed.contains(&tx_key(tx_hash)))
    }

    async fn mark_processed(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        self.state.lock().unwrap().processed.insert(tx_key(tx_hash));
        Ok(())
    }

    async fn claim(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        Ok(self.state.lock().unwrap().processed.insert(tx_key(tx_hash)))
    }

    async fn release(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        self.state.lock().unwrap().processed.remove(&tx_key(tx_hash));
        Ok(())
    }

    async fn get_stats(&self) -> SweeperResult<Statistics> {
        Ok(self.state.lock().unwrap().stats.clone())
    }

    async fn update_stats(&self, update: StatsUpdate) -> SweeperResult<Statistics> {
        let mut state = self.state.lock().unwrap();
        state.stats.merge(update);
        Ok(state.stats.clone())
    }

    async fn info(&self) -> SweeperResult<StorageInfo> {
        let state = self.state.lock().unwrap();
        Ok(StorageInfo {
            backend: self.backend().to_string(),
            last_checked_block: state.last_checked_block,
            processed_count: Some(state.processed.len()),
            stats: state.stats.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_checkpoint_and_processed() {
        let storage = MemoryStorage::new(10);
        assert_eq!(storage.get_checkpoint().await.unwrap(), 0);
        storage.set_checkpoint(1234).await.unwrap();
        assert_eq!(storage.get_checkpoint().await.unwrap(), 1234);

        let tx = TxHash::from_low_u64_be(1);
        assert!(!storage.is_processed(&tx).await.unwrap());
        storage.mark_processed(&tx).await.unwrap();
        storage.mark_processed(&tx).await.unwrap();
        assert!(storage.is_processed(&tx).await.unwrap());
        assert_eq!(storage.info().await.unwrap().processed_count, Some(1));
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let storage = MemoryStorage::new(500);
        for i in 0..501u64 {
            storage
                .mark_processed(&TxHash::from_low_u64_be(i))
                .await
                .unwrap();
        }
        assert!(!storage
            .is_processed(&TxHash::from_low_u64_be(0))
            .await
            .unwrap());
        assert!(storage
            .is_processed(&TxHash::from_low_u64_be(500))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let storage = Arc::new(MemoryStorage::new(10));
        let tx = TxHash::from_low_u64_be(7);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.claim(&tx).await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        storage.release(&tx).await.unwrap();
        assert!(!storage.is_processed(&tx).await.unwrap());
        assert!(storage.claim(&tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_merge() {
        let storage = MemoryStorage::new(10);
        storage
            .update_stats(StatsUpdate {
                total_checks: Some(4),
                transfers_found: Some(10),
                transfers_processed: Some(0),
            })
            .await
            .unwrap();
        let stats = storage
            .update_stats(StatsUpdate {
                total_checks: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stats.total_checks, 5);
        assert_eq!(stats.transfers_found, 10);
        assert_eq!(stats.transfers_processed, 0);
        assert!(stats.last_check.is_some());
        assert_eq!(storage.get_stats().await.unwrap(), stats);
    }
}
