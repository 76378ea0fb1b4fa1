// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::SweeperResult;
use crate::orchestrator::SweepOrchestrator;
use crate::types::{BalanceSnapshot, CycleReport, EventDetail, StatusReport, SweepStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a manual forward, with the balance read back afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardReport {
    pub outcome: EventDetail,
    pub balance: Option<BalanceSnapshot>,
}

impl ForwardReport {
    pub fn status(&self) -> SweepStatus {
        self.outcome.status
    }
}

#[async_trait]
pub trait SweeperRequestHandlerTrait {
    // Runs one scan-and-sweep cycle over the blocks since the checkpoint
    async fn handle_check_transfers(&self) -> SweeperResult<CycleReport>;
    // Balances, statistics and checkpoint of the monitored account
    async fn handle_status(&self) -> SweeperResult<StatusReport>;
    // Forwards the current balance regardless of deposits
    async fn handle_manual_forward(&self) -> SweeperResult<ForwardReport>;
}

pub struct SweeperRequestHandler {
    orchestrator: Arc<SweepOrchestrator>,
}

impl SweeperRequestHandler {
    pub fn new(orchestrator: Arc<SweepOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl SweeperRequestHandlerTrait for SweeperRequestHandler {
    async fn handle_check_transfers(&self) -> SweeperResult<CycleReport> {
        self.orchestrator.run_cycle().await
    }

    async fn handle_status(&self) -> SweeperResult<StatusReport> {
        self.orchestrator.status().await
    }

    async fn handle_manual_forward(&self) -> SweeperResult<ForwardReport> {
        let outcome = self.orchestrator.forward_now().await;
        let decimals = self.orchestrator.decimals().await;
        info!(
            "[Handler] Manual forward finished with status {}",
            outcome.status.as_str()
        );
        let balance = match self.orchestrator.balance_snapshot().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("[Handler] Failed to read balance after forward: {}", e);
                None
            }
        };
        Ok(ForwardReport {
            outcome: outcome.to_detail(decimals),
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_mock_client::ConfirmationBehavior;
    use crate::test_utils::{harness, monitored_account, test_token, transfer_to};
    use crate::types::Asset;
    use ethers::utils::parse_ether;

    #[tokio::test]
    async fn test_check_transfers_runs_a_cycle() {
        let h = harness(Asset::Native);
        h.client.set_latest_block(110);
        h.storage.set_checkpoint(100).await.unwrap();
        h.client.add_transfer(transfer_to(monitored_account(), 0xabc, 105));
        h.client.set_balance(Asset::Native, parse_ether("1").unwrap());

        let handler = SweeperRequestHandler::new(h.orchestrator.clone());
        let report = handler.handle_check_transfers().await.unwrap();
        assert_eq!(report.results.transfers_found, 1);
        assert_eq!(report.results.transfers_processed, 1);
        assert_eq!(h.storage.get_checkpoint().await.unwrap(), 110);
    }

    #[tokio::test]
    async fn test_manual_forward_reports_balance() {
        let h = harness(test_token());
        h.client.set_balance(test_token(), 5_000_000u64.into());
        h.client.set_balance(Asset::Native, parse_ether("0.1").unwrap());
        h.client.set_decimals(6);

        let handler = SweeperRequestHandler::new(h.orchestrator.clone());
        let report = handler.handle_manual_forward().await.unwrap();
        assert_eq!(report.status(), SweepStatus::Processed);
        assert_eq!(report.outcome.amount.as_deref(), Some("5.000000"));
        assert!(report.outcome.tx_hash.is_none());
        assert_eq!(h.client.submitted().len(), 1);
        assert_eq!(
            report.balance.unwrap().address,
            monitored_account()
        );
    }

    #[tokio::test]
    async fn test_manual_forward_failure_is_not_an_error() {
        let h = harness(Asset::Native);
        h.client.set_balance(Asset::Native, parse_ether("1").unwrap());
        h.client.set_confirmation(ConfirmationBehavior::Revert);

        let handler = SweeperRequestHandler::new(h.orchestrator.clone());
        let report = handler.handle_manual_forward().await.unwrap();
        assert_eq!(report.status(), SweepStatus::Failed);
        assert!(report.outcome.transfer_tx.is_some());
        assert!(report.outcome.error.is_some());
    }
}
