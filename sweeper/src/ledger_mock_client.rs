// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A mock implementation of [`LedgerClient`] with preset responses and
//! recorded calls.

use crate::error::{SweeperError, SweeperResult};
use crate::ledger_client::LedgerClient;
use crate::types::{Asset, FeeEstimate, ForwardReceipt, ForwardRequest, TransferEvent};
use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ConfirmationBehavior {
    Confirm,
    Revert,
    /// Never resolves, the caller's timeout fires
    Hang,
    Fail(SweeperError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedForward {
    pub request: ForwardRequest,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub tx_hash: TxHash,
}

pub struct LedgerMockClient {
    latest_block: AtomicU64,
    latest_block_error: Mutex<Option<SweeperError>>,
    transfers: Mutex<Vec<TransferEvent>>,
    transfers_error: Mutex<Option<SweeperError>>,
    transfer_queries: Mutex<Vec<(u64, u64)>>,
    balances: Mutex<HashMap<Asset, U256>>,
    balance_error: Mutex<Option<SweeperError>>,
    balance_reads: AtomicUsize,
    decimals: AtomicU64,
    fee_estimate: Mutex<SweeperResult<FeeEstimate>>,
    submit_responses: Mutex<VecDeque<SweeperResult<TxHash>>>,
    next_tx: AtomicU64,
    submitted: Mutex<Vec<SubmittedForward>>,
    confirmation: Mutex<ConfirmationBehavior>,
    subscriptions: Mutex<VecDeque<SweeperResult<mpsc::Receiver<TransferEvent>>>>,
    subscribe_calls: AtomicUsize,
}

impl Default for LedgerMockClient {
    fn default() -> Self {
        Self {
            latest_block: AtomicU64::new(0),
            latest_block_error: Default::default(),
            transfers: Default::default(),
            transfers_error: Default::default(),
            transfer_queries: Default::default(),
            balances: Default::default(),
            balance_error: Default::default(),
            balance_reads: AtomicUsize::new(0),
            decimals: AtomicU64::new(18),
            fee_estimate: Mutex::new(Ok(FeeEstimate::new(21_000u64, 1_000_000_000u64))),
            submit_responses: Default::default(),
            next_tx: AtomicU64::new(0xf000),
            submitted: Default::default(),
            confirmation: Mutex::new(ConfirmationBehavior::Confirm),
            subscriptions: Default::default(),
            subscribe_calls: AtomicUsize::new(0),
        }
    }
}

impl LedgerMockClient {
    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
        self.latest_block_error.lock().unwrap().take();
    }

    pub fn fail_latest_block(&self, error: SweeperError) {
        *self.latest_block_error.lock().unwrap() = Some(error);
    }

    pub fn add_transfer(&self, event: TransferEvent) {
        self.transfers.lock().unwrap().push(event);
    }

    pub fn fail_transfers(&self, error: SweeperError) {
        *self.transfers_error.lock().unwrap() = Some(error);
    }

    pub fn transfer_queries(&self) -> Vec<(u64, u64)> {
        self.transfer_queries.lock().unwrap().clone()
    }

    pub fn set_balance(&self, asset: Asset, balance: U256) {
        self.balances.lock().unwrap().insert(asset, balance);
    }

    pub fn fail_balance(&self, error: SweeperError) {
        *self.balance_error.lock().unwrap() = Some(error);
    }

    pub fn clear_balance_failure(&self) {
        self.balance_error.lock().unwrap().take();
    }

    pub fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    pub fn set_decimals(&self, decimals: u32) {
        self.decimals.store(decimals as u64, Ordering::SeqCst);
    }

    pub fn set_fee_estimate(&self, estimate: SweeperResult<FeeEstimate>) {
        *self.fee_estimate.lock().unwrap() = estimate;
    }

    /// Queues the result of the next `submit_forward`. Without queued
    /// responses submissions succeed with fresh hashes.
    pub fn push_submit_response(&self, response: SweeperResult<TxHash>) {
        self.submit_responses.lock().unwrap().push_back(response);
    }

    pub fn submitted(&self) -> Vec<SubmittedForward> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn set_confirmation(&self, behavior: ConfirmationBehavior) {
        *self.confirmation.lock().unwrap() = behavior;
    }

    pub fn push_subscription(&self, subscription: SweeperResult<mpsc::Receiver<TransferEvent>>) {
        self.subscriptions.lock().unwrap().push_back(subscription);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for LedgerMockClient {
    async fn get_latest_block_number(&self) -> SweeperResult<u64> {
        if let Some(err) = self.latest_block_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn get_incoming_transfers(
        &self,
        _asset: Asset,
        _account: Address,
        start_block: u64,
        end_block: u64,
    ) -> SweeperResult<Vec<TransferEvent>> {
        self.transfer_queries
            .lock()
            .unwrap()
            .push((start_block, end_block));
        if let Some(err) = self.transfers_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number >= start_block && e.block_number <= end_block)
            .cloned()
            .collect())
    }

    async fn get_balance(&self, asset: Asset, _account: Address) -> SweeperResult<U256> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.balance_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&asset)
            .copied()
            .unwrap_or_default())
    }

    async fn get_decimals(&self, _asset: Asset) -> u32 {
        self.decimals.load(Ordering::SeqCst) as u32
    }

    async fn estimate_fee(&self, _request: &ForwardRequest) -> SweeperResult<FeeEstimate> {
        self.fee_estimate.lock().unwrap().clone()
    }

    async fn submit_forward(
        &self,
        request: &ForwardRequest,
        gas_limit: U256,
        gas_price: U256,
    ) -> SweeperResult<TxHash> {
        let response = self
            .submit_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TxHash::from_low_u64_be(
                    self.next_tx.fetch_add(1, Ordering::SeqCst),
                ))
            });
        let tx_hash = response?;
        self.submitted.lock().unwrap().push(SubmittedForward {
            request: *request,
            gas_limit,
            gas_price,
            tx_hash,
        });
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        _confirmations: usize,
    ) -> SweeperResult<ForwardReceipt> {
        let behavior = self.confirmation.lock().unwrap().clone();
        match behavior {
            ConfirmationBehavior::Confirm => Ok(ForwardReceipt {
                tx_hash,
                block_number: Some(self.latest_block.load(Ordering::SeqCst) + 1),
            }),
            ConfirmationBehavior::Revert => Err(SweeperError::TxReverted(tx_hash)),
            ConfirmationBehavior::Hang => futures::future::pending().await,
            ConfirmationBehavior::Fail(err) => Err(err),
        }
    }

    async fn subscribe_transfers(
        &self,
        _asset: Asset,
        _account: Address,
    ) -> SweeperResult<mpsc::Receiver<TransferEvent>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(SweeperError::SubscriptionError(
                    "no subscription configured".into(),
                ))
            })
    }
}
