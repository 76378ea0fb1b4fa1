// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

/// What the monitored account receives and forwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Asset {
    /// The chain's own currency. Fees are deducted from the swept amount.
    #[default]
    Native,
    /// An ERC-20 token. Fees are paid in the native currency by the signer.
    Token { address: Address },
}

impl Asset {
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Asset::Native => "native",
            Asset::Token { .. } => "token",
        }
    }
}

/// An incoming transfer to the monitored account. Never mutated after it is
/// produced by the scanner or a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub source: Address,
    pub destination: Address,
    pub amount: U256,
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// Canonical string form of a transaction identifier, used as the
/// idempotency key by every storage backend.
pub fn tx_key(tx_hash: &TxHash) -> String {
    format!("{:?}", tx_hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub gas_limit: U256,
    pub gas_price: U256,
}

impl FeeEstimate {
    pub fn new(gas_limit: impl Into<U256>, gas_price: impl Into<U256>) -> Self {
        Self {
            gas_limit: gas_limit.into(),
            gas_price: gas_price.into(),
        }
    }

    /// Raw fee in native units (wei)
    pub fn fee(&self) -> U256 {
        self.gas_limit.saturating_mul(self.gas_price)
    }

    /// Gas limit with a percentage buffer on top
    pub fn gas_limit_with_margin(&self, margin_percent: u64) -> U256 {
        self.gas_limit.saturating_mul(U256::from(100 + margin_percent)) / U256::from(100)
    }

    /// Fee paid when submitting with the buffered gas limit
    pub fn fee_with_margin(&self, margin_percent: u64) -> U256 {
        self.gas_limit_with_margin(margin_percent)
            .saturating_mul(self.gas_price)
    }
}

/// A single forwarding transfer to be estimated or submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardRequest {
    pub asset: Asset,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    Processed,
    Failed,
    Ambiguous,
}

impl SweepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepStatus::Processed => "processed",
            SweepStatus::Failed => "failed",
            SweepStatus::Ambiguous => "ambiguous",
        }
    }
}

/// Result of one sweep attempt. Lives only inside a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub status: SweepStatus,
    /// Deposit that triggered the sweep, `None` for manual forwards
    pub trigger_tx: Option<TxHash>,
    pub forward_tx: Option<TxHash>,
    pub amount: Option<U256>,
    pub error: Option<String>,
}

impl SweepOutcome {
    pub fn processed(
        trigger_tx: Option<TxHash>,
        forward_tx: Option<TxHash>,
        amount: Option<U256>,
    ) -> Self {
        Self {
            status: SweepStatus::Processed,
            trigger_tx,
            forward_tx,
            amount,
            error: None,
        }
    }

    pub fn failed(trigger_tx: Option<TxHash>, forward_tx: Option<TxHash>, error: String) -> Self {
        Self {
            status: SweepStatus::Failed,
            trigger_tx,
            forward_tx,
            amount: None,
            error: Some(error),
        }
    }

    pub fn ambiguous(
        trigger_tx: Option<TxHash>,
        forward_tx: TxHash,
        amount: U256,
        error: String,
    ) -> Self {
        Self {
            status: SweepStatus::Ambiguous,
            trigger_tx,
            forward_tx: Some(forward_tx),
            amount: Some(amount),
            error: Some(error),
        }
    }

    /// Whether anything reached the ledger. A failure before submission
    /// leaves the account untouched.
    pub fn submitted(&self) -> bool {
        self.forward_tx.is_some()
    }

    pub fn to_detail(&self, decimals: u32) -> EventDetail {
        EventDetail {
            tx_hash: self.trigger_tx,
            transfer_tx: self.forward_tx,
            amount: self.amount.map(|a| format_amount(a, decimals)),
            error: self.error.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    pub tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_tx: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: SweepStatus,
}

/// Running counters, merged field by field on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub total_checks: u64,
    #[serde(default)]
    pub transfers_found: u64,
    #[serde(default)]
    pub transfers_processed: u64,
    #[serde(default)]
    pub last_check: Option<String>,
}

/// Partial statistics. `None` fields leave the stored value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsUpdate {
    pub total_checks: Option<u64>,
    pub transfers_found: Option<u64>,
    pub transfers_processed: Option<u64>,
}

impl Statistics {
    /// Applies `update` and refreshes `last_check`.
    pub fn merge(&mut self, update: StatsUpdate) {
        if let Some(v) = update.total_checks {
            self.total_checks = v;
        }
        if let Some(v) = update.transfers_found {
            self.transfers_found = v;
        }
        if let Some(v) = update.transfers_processed {
            self.transfers_processed = v;
        }
        self.last_check = Some(now_timestamp());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResults {
    pub blocks_scanned: BlockRange,
    pub window_reset: bool,
    pub transfers_found: u64,
    pub transfers_processed: u64,
    pub transfers_skipped: u64,
    pub details: Vec<EventDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub results: CycleResults,
    pub statistics: Statistics,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub native: String,
    pub token: Option<String>,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub balance: BalanceSnapshot,
    pub statistics: Statistics,
    pub last_checked_block: u64,
    pub monitor_address: Address,
    pub destination_address: Address,
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Formats a raw amount with `decimals` fractional digits.
pub fn format_amount(amount: U256, decimals: u32) -> String {
    ethers::utils::format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}
