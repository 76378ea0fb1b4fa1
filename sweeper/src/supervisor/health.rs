// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic sample of block height and the monitored account's balances.

use crate::ledger_client::LedgerClient;
use crate::metrics::SweeperMetrics;
use crate::supervisor::Observable;
use crate::types::{format_amount, Asset};
use async_trait::async_trait;
use ethers::types::Address;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};

pub struct AccountHealth {
    client: Arc<dyn LedgerClient>,
    asset: Asset,
    account: Address,
    metrics: Arc<SweeperMetrics>,
    interval: Duration,
}

impl AccountHealth {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        asset: Asset,
        account: Address,
        metrics: Arc<SweeperMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            asset,
            account,
            metrics,
            interval,
        }
    }

    async fn sample_balance(&self, asset: Asset) -> Option<String> {
        match self.client.get_balance(asset, self.account).await {
            Ok(balance) => {
                let formatted = format_amount(balance, self.client.get_decimals(asset).await);
                if let Ok(value) = formatted.parse::<f64>() {
                    self.metrics
                        .account_balance
                        .with_label_values(&[asset.label()])
                        .set(value);
                }
                Some(formatted)
            }
            Err(e) => {
                error!("[Health] Error getting {} balance: {}", asset.label(), e);
                None
            }
        }
    }
}

#[async_trait]
impl Observable for AccountHealth {
    fn name(&self) -> &str {
        "AccountHealth"
    }

    async fn observe_and_report(&self) {
        let block = match self.client.get_latest_block_number().await {
            Ok(block) => {
                self.metrics.latest_block.set(block as i64);
                Some(block)
            }
            Err(e) => {
                error!("[Health] Error getting latest block: {}", e);
                None
            }
        };
        let native = self.sample_balance(Asset::Native).await;
        let token = match self.asset {
            Asset::Native => None,
            token => self.sample_balance(token).await,
        };
        info!(
            "[Health] Health check - Block: {}, native balance: {}, token balance: {}",
            block.map(|b| b.to_string()).unwrap_or_else(|| "?".into()),
            native.as_deref().unwrap_or("?"),
            token.as_deref().unwrap_or("-")
        );
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
