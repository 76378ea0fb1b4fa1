// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Drives one scan-and-forward cycle:
//! checkpoint -> scan -> (claim -> sweep -> record) per event -> checkpoint
//! -> statistics -> report.

use crate::error::SweeperResult;
use crate::ledger_client::LedgerClient;
use crate::metrics::SweeperMetrics;
use crate::scanner::{EventScanner, ScanConfig};
use crate::storage::Storage;
use crate::sweep::{SweepConfig, SweepEngine};
use crate::types::{
    format_amount, now_timestamp, Asset, BalanceSnapshot, BlockRange, CycleReport, CycleResults,
    Statistics, StatsUpdate, StatusReport, SweepOutcome, SweepStatus, TransferEvent,
};
use ethers::types::{Address, TxHash};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const NATIVE_DECIMALS: u32 = 18;

pub struct SweepOrchestrator {
    client: Arc<dyn LedgerClient>,
    storage: Arc<dyn Storage>,
    scanner: EventScanner,
    engine: SweepEngine,
    asset: Asset,
    account: Address,
    destination: Address,
    live_settle_delay: Duration,
    decimals: OnceCell<u32>,
    metrics: Arc<SweeperMetrics>,
}

impl SweepOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn LedgerClient>,
        storage: Arc<dyn Storage>,
        asset: Asset,
        account: Address,
        destination: Address,
        scan_config: ScanConfig,
        sweep_config: SweepConfig,
        metrics: Arc<SweeperMetrics>,
    ) -> Self {
        let scanner = EventScanner::new(client.clone(), asset, account, scan_config);
        let live_settle_delay = Duration::from_secs(sweep_config.settle_delay_secs);
        let engine = SweepEngine::new(
            client.clone(),
            asset,
            account,
            destination,
            sweep_config,
            metrics.clone(),
        );
        Self {
            client,
            storage,
            scanner,
            engine,
            asset,
            account,
            destination,
            live_settle_delay,
            decimals: OnceCell::new(),
            metrics,
        }
    }

    /// Delay before sweeping a deposit pushed by the live subscription.
    pub fn with_live_settle_delay(mut self, delay: Duration) -> Self {
        self.live_settle_delay = delay;
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn destination(&self) -> Address {
        self.destination
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn client(&self) -> Arc<dyn LedgerClient> {
        self.client.clone()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub async fn decimals(&self) -> u32 {
        *self
            .decimals
            .get_or_init(|| self.client.get_decimals(self.asset))
            .await
    }

    /// Runs one cycle. Errors abort the cycle before the checkpoint moves;
    /// per-event failures are reported in the result instead.
    pub async fn run_cycle(&self) -> SweeperResult<CycleReport> {
        self.metrics.cycles_total.inc();
        let result = self.do_run_cycle().await;
        if let Err(e) = &result {
            tracing::error!("[Orchestrator] Cycle aborted: {}", e);
            self.metrics
                .cycles_failed
                .with_label_values(&[e.error_type()])
                .inc();
        }
        result
    }

    async fn do_run_cycle(&self) -> SweeperResult<CycleReport> {
        let checkpoint = match self.storage.get_checkpoint().await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(
                    "[Orchestrator] Failed to read checkpoint, starting from scratch: {}",
                    e
                );
                0
            }
        };

        let scan = self.scanner.scan(checkpoint).await?;
        if scan.window.reset {
            self.metrics.window_resets.inc();
        }
        let found = scan.events.len() as u64;
        self.metrics
            .events_observed
            .with_label_values(&["scan"])
            .inc_by(found);

        let decimals = self.decimals().await;
        let mut details = vec![];
        let mut processed = 0;
        let mut skipped = 0;
        for event in &scan.events {
            match self.sweep_event(event, Duration::ZERO).await? {
                Some(outcome) => {
                    if outcome.status == SweepStatus::Processed {
                        processed += 1;
                    }
                    details.push(outcome.to_detail(decimals));
                }
                None => skipped += 1,
            }
        }

        let new_checkpoint = scan.new_head.max(checkpoint);
        self.storage.set_checkpoint(new_checkpoint).await?;
        self.metrics.last_checked_block.set(new_checkpoint as i64);

        let statistics = self.record_stats(true, found, processed).await;
        tracing::info!(
            "[Orchestrator] Cycle done: blocks {}..={}, found {}, processed {}, skipped {}",
            scan.window.from,
            scan.window.to,
            found,
            processed,
            skipped
        );

        Ok(CycleReport {
            results: CycleResults {
                blocks_scanned: BlockRange {
                    from: scan.window.from,
                    to: scan.window.to,
                },
                window_reset: scan.window.reset,
                transfers_found: found,
                transfers_processed: processed,
                transfers_skipped: skipped,
                details,
            },
            statistics,
            timestamp: now_timestamp(),
        })
    }

    /// Claims `event` and sweeps it. `None` when it was already claimed.
    /// A claim error is returned since idempotency cannot be decided.
    async fn sweep_event(
        &self,
        event: &TransferEvent,
        settle_delay: Duration,
    ) -> SweeperResult<Option<SweepOutcome>> {
        if !self.storage.claim(&event.tx_hash).await? {
            tracing::info!(
                "[Orchestrator] Transfer {:?} already processed, skipping",
                event.tx_hash
            );
            self.metrics.events_skipped.inc();
            return Ok(None);
        }
        tracing::info!(
            "[Orchestrator] New transfer {:?} of {} from {:?} in block {}",
            event.tx_hash,
            event.amount,
            event.source,
            event.block_number
        );

        let outcome = match self
            .engine
            .sweep_with_delay(Some(event.tx_hash), settle_delay)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_claim(&event.tx_hash).await;
                return Err(e);
            }
        };
        if outcome.status == SweepStatus::Failed && !outcome.submitted() {
            // nothing reached the ledger, let a later cycle retry
            self.release_claim(&event.tx_hash).await;
        }
        Ok(Some(outcome))
    }

    async fn release_claim(&self, tx_hash: &TxHash) {
        if let Err(e) = self.storage.release(tx_hash).await {
            tracing::error!(
                "[Orchestrator] Failed to release claim on {:?}: {}",
                tx_hash,
                e
            );
        }
    }

    async fn record_stats(&self, count_check: bool, found: u64, processed: u64) -> Statistics {
        let current = self.storage.get_stats().await.unwrap_or_else(|e| {
            tracing::warn!("[Orchestrator] Failed to read statistics: {}", e);
            Statistics::default()
        });
        let update = StatsUpdate {
            total_checks: count_check.then_some(current.total_checks + 1),
            transfers_found: Some(current.transfers_found + found),
            transfers_processed: Some(current.transfers_processed + processed),
        };
        match self.storage.update_stats(update).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("[Orchestrator] Failed to update statistics: {}", e);
                current
            }
        }
    }

    /// Handles a deposit pushed by the live subscription: claim, sweep and
    /// statistics. The checkpoint is left to the scanning cycles.
    pub async fn handle_live_deposit(
        &self,
        event: &TransferEvent,
    ) -> SweeperResult<Option<SweepOutcome>> {
        if event.destination != self.account {
            return Ok(None);
        }
        self.metrics
            .events_observed
            .with_label_values(&["live"])
            .inc();
        let outcome = self.sweep_event(event, self.live_settle_delay).await?;
        if let Some(outcome) = &outcome {
            let processed = (outcome.status == SweepStatus::Processed) as u64;
            self.record_stats(false, 1, processed).await;
        }
        Ok(outcome)
    }

    /// Sweeps whatever the account holds right now, outside of any deposit.
    pub async fn forward_now(&self) -> SweepOutcome {
        tracing::info!("[Orchestrator] Manual forward requested");
        self.engine
            .sweep_with_delay(None, Duration::ZERO)
            .await
            .unwrap_or_else(|e| SweepOutcome::failed(None, None, e.to_string()))
    }

    pub async fn balance_snapshot(&self) -> SweeperResult<BalanceSnapshot> {
        let native = self.client.get_balance(Asset::Native, self.account).await?;
        let token = match self.asset {
            Asset::Native => None,
            asset @ Asset::Token { .. } => {
                let balance = self.client.get_balance(asset, self.account).await?;
                Some(format_amount(balance, self.decimals().await))
            }
        };
        Ok(BalanceSnapshot {
            native: format_amount(native, NATIVE_DECIMALS),
            token,
            address: self.account,
        })
    }

    pub async fn status(&self) -> SweeperResult<StatusReport> {
        let balance = self.balance_snapshot().await?;
        let statistics = self.storage.get_stats().await.unwrap_or_else(|e| {
            tracing::warn!("[Orchestrator] Failed to read statistics: {}", e);
            Statistics::default()
        });
        let last_checked_block = self.storage.get_checkpoint().await.unwrap_or_else(|e| {
            tracing::warn!("[Orchestrator] Failed to read checkpoint: {}", e);
            0
        });
        Ok(StatusReport {
            balance,
            statistics,
            last_checked_block,
            monitor_address: self.account,
            destination_address: self.destination,
        })
    }
}
