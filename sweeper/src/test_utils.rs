// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::ledger_mock_client::LedgerMockClient;
use crate::metrics::SweeperMetrics;
use crate::orchestrator::SweepOrchestrator;
use crate::scanner::ScanConfig;
use crate::storage::memory::MemoryStorage;
use crate::storage::Storage;
use crate::sweep::SweepConfig;
use crate::types::{Asset, TransferEvent};
use ethers::types::{Address, TxHash};
use ethers::utils::parse_ether;
use std::sync::Arc;

pub fn monitored_account() -> Address {
    Address::repeat_byte(0x11)
}

pub fn destination_account() -> Address {
    Address::repeat_byte(0x22)
}

pub fn transfer_to(account: Address, tx: u64, block_number: u64) -> TransferEvent {
    TransferEvent {
        source: Address::repeat_byte(0x33),
        destination: account,
        amount: parse_ether("1").unwrap(),
        tx_hash: TxHash::from_low_u64_be(tx),
        block_number,
    }
}

/// Sweep settings with the settle delay off and a short confirmation
/// timeout.
pub fn test_sweep_config() -> SweepConfig {
    SweepConfig {
        confirmation_timeout_secs: 1,
        settle_delay_secs: 0,
        ..Default::default()
    }
}

pub struct TestHarness {
    pub client: Arc<LedgerMockClient>,
    pub storage: Arc<dyn Storage>,
    pub metrics: Arc<SweeperMetrics>,
    pub orchestrator: Arc<SweepOrchestrator>,
}

pub fn harness_with_storage(asset: Asset, storage: Arc<dyn Storage>) -> TestHarness {
    let client = Arc::new(LedgerMockClient::default());
    let metrics = Arc::new(SweeperMetrics::new_for_testing());
    let orchestrator = Arc::new(SweepOrchestrator::new(
        client.clone(),
        storage.clone(),
        asset,
        monitored_account(),
        destination_account(),
        ScanConfig::default(),
        test_sweep_config(),
        metrics.clone(),
    ));
    TestHarness {
        client,
        storage,
        metrics,
        orchestrator,
    }
}

pub fn harness(asset: Asset) -> TestHarness {
    harness_with_storage(asset, Arc::new(MemoryStorage::new(1000)))
}

pub fn test_token() -> Asset {
    Asset::Token {
        address: Address::repeat_byte(0x77),
    }
}
