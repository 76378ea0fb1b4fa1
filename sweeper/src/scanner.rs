// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::SweeperResult;
use crate::ledger_client::LedgerClient;
use crate::types::{Asset, TransferEvent};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScanConfig {
    /// A checkpoint further behind the head than this is abandoned.
    pub stale_threshold: u64,
    /// Blocks rescanned when starting fresh or after a stale checkpoint.
    pub recent_window: u64,
    /// Largest block range sent in a single query.
    pub max_block_range: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stale_threshold: 1000,
            recent_window: 100,
            max_block_range: 500,
        }
    }
}

/// Inclusive block range. Empty when `from > to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: u64,
    pub to: u64,
    /// The checkpoint was missing or stale and got replaced
    pub reset: bool,
}

impl ScanWindow {
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub window: ScanWindow,
    pub events: Vec<TransferEvent>,
    /// Checkpoint to persist once the events are handled
    pub new_head: u64,
}

pub fn compute_scan_window(checkpoint: u64, head: u64, config: &ScanConfig) -> ScanWindow {
    if checkpoint == 0 || head.saturating_sub(checkpoint) > config.stale_threshold {
        return ScanWindow {
            from: head.saturating_sub(config.recent_window),
            to: head,
            reset: true,
        };
    }
    // the checkpoint block itself was already scanned
    ScanWindow {
        from: checkpoint + 1,
        to: head,
        reset: false,
    }
}

/// Splits an inclusive range into consecutive chunks of at most `max_range`
/// blocks.
pub fn chunk_range(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut chunks = vec![];
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

pub struct EventScanner {
    client: Arc<dyn LedgerClient>,
    asset: Asset,
    account: Address,
    config: ScanConfig,
}

impl EventScanner {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        asset: Asset,
        account: Address,
        config: ScanConfig,
    ) -> Self {
        Self {
            client,
            asset,
            account,
            config,
        }
    }

    /// Fetches transfers to the monitored account after `checkpoint`.
    /// Provider errors are returned as-is and leave nothing half-done.
    pub async fn scan(&self, checkpoint: u64) -> SweeperResult<ScanResult> {
        let head = self.client.get_latest_block_number().await?;
        let window = compute_scan_window(checkpoint, head, &self.config);
        if window.reset {
            tracing::info!(
                "[Scanner] Checkpoint {} is unset or stale (head {}), scanning recent blocks from {}",
                checkpoint,
                head,
                window.from
            );
        }
        if window.is_empty() {
            tracing::debug!(
                "[Scanner] No new blocks (checkpoint {}, head {})",
                checkpoint,
                head
            );
            return Ok(ScanResult {
                window,
                events: vec![],
                new_head: checkpoint.max(head),
            });
        }

        tracing::info!("[Scanner] Scanning blocks {} to {}", window.from, window.to);
        let mut events = vec![];
        for (start, end) in chunk_range(window.from, window.to, self.config.max_block_range) {
            let chunk = self
                .client
                .get_incoming_transfers(self.asset, self.account, start, end)
                .await?;
            events.extend(chunk.into_iter().filter(|e| e.destination == self.account));
        }
        events.sort_by_key(|e| e.block_number);
        tracing::info!(
            "[Scanner] Found {} incoming transfers in blocks {}..={}",
            events.len(),
            window.from,
            window.to
        );
        Ok(ScanResult {
            window,
            events,
            new_head: head,
        })
    }
}
