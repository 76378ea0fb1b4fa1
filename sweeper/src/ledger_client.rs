// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The ledger operations the sweeper depends on.
//!
//! [`crate::eth_client::EthLedgerClient`] implements them over `ethers`; tests
//! use [`crate::ledger_mock_client::LedgerMockClient`].

use crate::error::SweeperResult;
use crate::types::{Asset, FeeEstimate, ForwardReceipt, ForwardRequest, TransferEvent};
use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use tokio::sync::mpsc;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_latest_block_number(&self) -> SweeperResult<u64>;

    /// Transfers of `asset` addressed to `account` in `[start_block, end_block]`,
    /// ordered by block. Callers are responsible for chunking large ranges.
    async fn get_incoming_transfers(
        &self,
        asset: Asset,
        account: Address,
        start_block: u64,
        end_block: u64,
    ) -> SweeperResult<Vec<TransferEvent>>;

    async fn get_balance(&self, asset: Asset, account: Address) -> SweeperResult<U256>;

    /// Decimals used to display amounts of `asset`.
    async fn get_decimals(&self, asset: Asset) -> u32;

    async fn estimate_fee(&self, request: &ForwardRequest) -> SweeperResult<FeeEstimate>;

    /// Signs and broadcasts a legacy transaction. Returns once the node
    /// accepted it, not when it is mined.
    async fn submit_forward(
        &self,
        request: &ForwardRequest,
        gas_limit: U256,
        gas_price: U256,
    ) -> SweeperResult<TxHash>;

    /// Waits until `tx_hash` has `confirmations` confirmations. A receipt
    /// with a failed status is reported as `TxReverted`. Never times out on
    /// its own; callers race it against a deadline.
    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: usize,
    ) -> SweeperResult<ForwardReceipt>;

    /// Opens a live feed of incoming transfers. The receiver closes when the
    /// underlying transport drops.
    async fn subscribe_transfers(
        &self,
        asset: Asset,
        account: Address,
    ) -> SweeperResult<mpsc::Receiver<TransferEvent>>;
}
