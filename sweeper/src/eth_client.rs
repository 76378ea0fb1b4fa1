// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{SweeperError, SweeperResult};
use crate::ledger_client::LedgerClient;
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::SweeperMetrics;
use crate::types::{Asset, FeeEstimate, ForwardReceipt, ForwardRequest, TransferEvent};
use async_trait::async_trait;
use ethers::contract::{abigen, parse_log, EthEvent};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Middleware, PendingTransaction, Provider, StreamExt, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Block, Filter, Log, Transaction, TransactionRequest, TxHash, H256, U256, U64,
};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::sync::{mpsc, oneshot};

abigen!(
    Erc20Token,
    r#"[
        event Transfer(address indexed from, address indexed to, uint256 value)
        function balanceOf(address account) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
        function decimals() external view returns (uint8)
    ]"#
);

const NATIVE_DECIMALS: u32 = 18;
const DEFAULT_TOKEN_DECIMALS: u32 = 18;
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const NATIVE_BLOCK_FETCH_CONCURRENCY: usize = 8;
const LIVE_CHANNEL_SIZE: usize = 1000;

type EthSigner = SignerMiddleware<Provider<MeteredEthHttpProvider>, LocalWallet>;

pub struct EthLedgerClient {
    provider: Arc<Provider<MeteredEthHttpProvider>>,
    signer: Arc<EthSigner>,
    ws_url: Option<String>,
}

impl EthLedgerClient {
    /// Connects to `rpc_url`, binds `wallet` to the node's chain id and
    /// refuses to start when `expected_chain_id` does not match.
    pub async fn new(
        rpc_url: &str,
        ws_url: Option<String>,
        wallet: LocalWallet,
        expected_chain_id: Option<u64>,
        metrics: Arc<SweeperMetrics>,
    ) -> anyhow::Result<Self> {
        let provider = new_metered_eth_provider(rpc_url, metrics)?;
        let chain_id = provider.get_chainid().await?.as_u64();
        let block_number = provider.get_block_number().await?;

        match expected_chain_id {
            Some(expected) if expected != chain_id => {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}",
                    expected,
                    chain_id
                ));
            }
            Some(_) => tracing::info!(
                "[EthClient] Connected to chain {} (verified), current block: {}",
                chain_id,
                block_number
            ),
            None => tracing::warn!(
                "[EthClient] Connected to chain {} (NOT VERIFIED - no expected chain id set), current block: {}",
                chain_id,
                block_number
            ),
        }

        let wallet = wallet.with_chain_id(chain_id);
        let signer = SignerMiddleware::new(provider.clone(), wallet);
        Ok(Self {
            provider: Arc::new(provider),
            signer: Arc::new(signer),
            ws_url,
        })
    }

    fn token(&self, address: Address) -> Erc20Token<Provider<MeteredEthHttpProvider>> {
        Erc20Token::new(address, self.provider.clone())
    }

    fn build_tx(&self, request: &ForwardRequest) -> SweeperResult<TransactionRequest> {
        let tx = TransactionRequest::new().from(request.from);
        match request.asset {
            Asset::Native => Ok(tx.to(request.to).value(request.amount)),
            Asset::Token { address } => {
                let data = self
                    .token(address)
                    .transfer(request.to, request.amount)
                    .calldata()
                    .ok_or_else(|| {
                        SweeperError::ProviderError("Failed to encode token transfer".into())
                    })?;
                Ok(tx.to(address).data(data))
            }
        }
    }

    async fn native_transfers_in_range(
        &self,
        account: Address,
        start_block: u64,
        end_block: u64,
    ) -> SweeperResult<Vec<TransferEvent>> {
        let provider = self.provider.clone();
        let blocks: Vec<Option<Block<Transaction>>> = futures::stream::iter(start_block..=end_block)
            .map(|n| {
                let provider = provider.clone();
                async move { provider.get_block_with_txs(n).await }
            })
            .buffered(NATIVE_BLOCK_FETCH_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(blocks
            .iter()
            .flatten()
            .flat_map(|block| native_transfers_in_block(block, account))
            .collect())
    }
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn get_latest_block_number(&self) -> SweeperResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn get_incoming_transfers(
        &self,
        asset: Asset,
        account: Address,
        start_block: u64,
        end_block: u64,
    ) -> SweeperResult<Vec<TransferEvent>> {
        if start_block > end_block {
            return Ok(vec![]);
        }
        let mut events = match asset {
            Asset::Native => {
                self.native_transfers_in_range(account, start_block, end_block)
                    .await?
            }
            Asset::Token { address } => {
                let logs = self
                    .token(address)
                    .transfer_filter()
                    .from_block(start_block)
                    .to_block(end_block)
                    .topic2(H256::from(account))
                    .query_with_meta()
                    .await
                    .map_err(|e| SweeperError::TransientProviderError(e.to_string()))
                    .tap_err(|e| {
                        tracing::error!(
                            "[EthClient] Transfer log query {}..={} failed: {:?}",
                            start_block,
                            end_block,
                            e
                        )
                    })?;
                logs.into_iter()
                    .filter(|(event, _)| event.to == account)
                    .map(|(event, meta)| TransferEvent {
                        source: event.from,
                        destination: event.to,
                        amount: event.value,
                        tx_hash: meta.transaction_hash,
                        block_number: meta.block_number.as_u64(),
                    })
                    .collect()
            }
        };
        events.sort_by_key(|e| e.block_number);
        Ok(events)
    }

    async fn get_balance(&self, asset: Asset, account: Address) -> SweeperResult<U256> {
        match asset {
            Asset::Native => Ok(self.provider.get_balance(account, None).await?),
            Asset::Token { address } => self
                .token(address)
                .balance_of(account)
                .call()
                .await
                .map_err(|e| SweeperError::TransientProviderError(e.to_string())),
        }
    }

    async fn get_decimals(&self, asset: Asset) -> u32 {
        match asset {
            Asset::Native => NATIVE_DECIMALS,
            Asset::Token { address } => match self.token(address).decimals().call().await {
                Ok(d) => d as u32,
                Err(e) => {
                    tracing::warn!(
                        "[EthClient] Failed to read decimals of {:?}, assuming {}: {}",
                        address,
                        DEFAULT_TOKEN_DECIMALS,
                        e
                    );
                    DEFAULT_TOKEN_DECIMALS
                }
            },
        }
    }

    async fn estimate_fee(&self, request: &ForwardRequest) -> SweeperResult<FeeEstimate> {
        let tx: TypedTransaction = self.build_tx(request)?.into();
        let gas_limit = self
            .provider
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| SweeperError::from_submission_error(e.to_string()))?;
        let gas_price = self.provider.get_gas_price().await?;
        Ok(FeeEstimate {
            gas_limit,
            gas_price,
        })
    }

    async fn submit_forward(
        &self,
        request: &ForwardRequest,
        gas_limit: U256,
        gas_price: U256,
    ) -> SweeperResult<TxHash> {
        let tx = self.build_tx(request)?.gas(gas_limit).gas_price(gas_price);
        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| SweeperError::from_submission_error(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: usize,
    ) -> SweeperResult<ForwardReceipt> {
        let receipt = PendingTransaction::new(tx_hash, self.provider.as_ref())
            .interval(CONFIRMATION_POLL_INTERVAL)
            .confirmations(confirmations.max(1))
            .await?
            .ok_or_else(|| {
                SweeperError::ProviderError(format!(
                    "Forward transaction {:?} dropped from mempool",
                    tx_hash
                ))
            })?;
        if receipt.status == Some(U64::zero()) {
            return Err(SweeperError::TxReverted(tx_hash));
        }
        Ok(ForwardReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn subscribe_transfers(
        &self,
        asset: Asset,
        account: Address,
    ) -> SweeperResult<mpsc::Receiver<TransferEvent>> {
        let ws_url = self
            .ws_url
            .clone()
            .ok_or_else(|| SweeperError::SubscriptionError("ws-url is not configured".into()))?;
        let ws = Provider::<Ws>::connect(ws_url.as_str())
            .await
            .map_err(|e| SweeperError::SubscriptionError(e.to_string()))?;
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        match asset {
            Asset::Token { address } => {
                let filter = Filter::new()
                    .address(address)
                    .topic0(TransferFilter::signature())
                    .topic2(H256::from(account));
                tokio::spawn(async move {
                    let mut stream = match ws.subscribe_logs(&filter).await {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    while let Some(log) = stream.next().await {
                        let Some(event) = transfer_from_log(log, account) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    tracing::info!("[EthClient] Transfer log subscription closed");
                });
            }
            Asset::Native => {
                tokio::spawn(async move {
                    let mut stream = match ws.subscribe_blocks().await {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    'outer: while let Some(header) = stream.next().await {
                        let Some(number) = header.number else {
                            continue;
                        };
                        let block = match ws.get_block_with_txs(number.as_u64()).await {
                            Ok(Some(block)) => block,
                            Ok(None) => continue,
                            Err(e) => {
                                tracing::warn!(
                                    "[EthClient] Failed to fetch block {}: {:?}",
                                    number,
                                    e
                                );
                                continue;
                            }
                        };
                        for event in native_transfers_in_block(&block, account) {
                            if tx.send(event).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    tracing::info!("[EthClient] Block subscription closed");
                });
            }
        }

        ready_rx
            .await
            .map_err(|_| SweeperError::SubscriptionError("Subscription task exited".into()))?
            .map_err(SweeperError::SubscriptionError)?;
        Ok(rx)
    }
}

/// Value-carrying transactions in `block` sent to `account`.
pub(crate) fn native_transfers_in_block(
    block: &Block<Transaction>,
    account: Address,
) -> Vec<TransferEvent> {
    let Some(block_number) = block.number else {
        return vec![];
    };
    block
        .transactions
        .iter()
        .filter(|tx| tx.to == Some(account) && !tx.value.is_zero())
        .map(|tx| TransferEvent {
            source: tx.from,
            destination: account,
            amount: tx.value,
            tx_hash: tx.hash,
            block_number: block_number.as_u64(),
        })
        .collect()
}

/// Decodes a token `Transfer` log addressed to `account`. Logs removed by a
/// reorg or still pending are ignored.
pub(crate) fn transfer_from_log(log: Log, account: Address) -> Option<TransferEvent> {
    if log.removed == Some(true) {
        return None;
    }
    let tx_hash = log.transaction_hash?;
    let block_number = log.block_number?.as_u64();
    let event: TransferFilter = parse_log(log).ok()?;
    (event.to == account).then_some(TransferEvent {
        source: event.from,
        destination: event.to,
        amount: event.value,
        tx_hash,
        block_number,
    })
}
