// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{SweeperError, SweeperResult};
use crate::ledger_client::LedgerClient;
use crate::metrics::SweeperMetrics;
use crate::types::{Asset, FeeEstimate, ForwardRequest, SweepOutcome};
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

const GWEI: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SweepConfig {
    /// Native amount always left on the account, e.g. "0.002"
    #[serde(with = "native_amount")]
    pub reserve: U256,
    pub fee_margin_percent: u64,
    pub confirmations: usize,
    pub confirmation_timeout_secs: u64,
    pub fallback_gas_limit: u64,
    pub fallback_gas_price_gwei: u64,
    /// Pause before reading the balance so the deposit is reflected in it
    pub settle_delay_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            // 0.002
            reserve: U256::from(2_000_000_000_000_000u64),
            fee_margin_percent: 20,
            confirmations: 1,
            confirmation_timeout_secs: 60,
            fallback_gas_limit: 100_000,
            fallback_gas_price_gwei: 50,
            settle_delay_secs: 0,
        }
    }
}

impl SweepConfig {
    pub fn fallback_fee(&self) -> FeeEstimate {
        FeeEstimate::new(
            self.fallback_gas_limit,
            U256::from(self.fallback_gas_price_gwei) * U256::from(GWEI),
        )
    }
}

/// Decimal strings in whole native units on the wire, wei in memory.
mod native_amount {
    use ethers::types::U256;
    use ethers::utils::{format_ether, parse_ether};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_ether(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_ether(s.trim()).map_err(serde::de::Error::custom)
    }
}

/// Amount that can be forwarded out of `balance`. Tokens move in full since
/// gas is paid in the native currency; native sweeps keep `reserve` plus the
/// buffered fee behind. `None` when nothing is left.
pub fn compute_transferable(
    asset: Asset,
    balance: U256,
    fee: &FeeEstimate,
    reserve: U256,
    fee_margin_percent: u64,
) -> Option<U256> {
    let amount = match asset {
        Asset::Token { .. } => balance,
        Asset::Native => balance
            .checked_sub(reserve)?
            .checked_sub(fee.fee_with_margin(fee_margin_percent))?,
    };
    (!amount.is_zero()).then_some(amount)
}

pub struct SweepEngine {
    client: Arc<dyn LedgerClient>,
    asset: Asset,
    account: Address,
    destination: Address,
    config: SweepConfig,
    metrics: Arc<SweeperMetrics>,
}

impl SweepEngine {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        asset: Asset,
        account: Address,
        destination: Address,
        config: SweepConfig,
        metrics: Arc<SweeperMetrics>,
    ) -> Self {
        Self {
            client,
            asset,
            account,
            destination,
            config,
            metrics,
        }
    }

    /// Forwards the current balance to the destination.
    ///
    /// Returns an error only when the balance cannot be read, in which case
    /// nothing about the deposit is known yet. Every later failure is folded
    /// into the outcome.
    pub async fn sweep(&self, trigger: Option<TxHash>) -> SweeperResult<SweepOutcome> {
        self.sweep_with_delay(trigger, Duration::from_secs(self.config.settle_delay_secs))
            .await
    }

    pub async fn sweep_with_delay(
        &self,
        trigger: Option<TxHash>,
        settle_delay: Duration,
    ) -> SweeperResult<SweepOutcome> {
        let outcome = self.do_sweep(trigger, settle_delay).await?;
        self.metrics
            .sweep_outcomes
            .with_label_values(&[outcome.status.as_str()])
            .inc();
        Ok(outcome)
    }

    async fn do_sweep(
        &self,
        trigger: Option<TxHash>,
        settle_delay: Duration,
    ) -> SweeperResult<SweepOutcome> {
        if !settle_delay.is_zero() {
            tracing::debug!("[SweepEngine] Waiting {:?} before reading balance", settle_delay);
            tokio::time::sleep(settle_delay).await;
        }

        let balance = self
            .client
            .get_balance(self.asset, self.account)
            .await
            .tap_err(|e| {
                self.metrics
                    .sweep_errors
                    .with_label_values(&[e.error_type()])
                    .inc();
                tracing::error!(
                    "[SweepEngine] Failed to read {} balance: {:?}",
                    self.asset.label(),
                    e
                );
            })?;
        if balance.is_zero() {
            tracing::info!("[SweepEngine] No {} balance to forward", self.asset.label());
            return Ok(SweepOutcome::processed(trigger, None, None));
        }

        let probe = ForwardRequest {
            asset: self.asset,
            from: self.account,
            to: self.destination,
            amount: if self.asset.is_native() {
                U256::one()
            } else {
                balance
            },
        };
        let fee = match self.client.estimate_fee(&probe).await {
            Ok(fee) => fee,
            Err(e) => {
                let fallback = self.config.fallback_fee();
                tracing::warn!(
                    "[SweepEngine] Fee estimation failed ({}), using fallback gas limit {} at {} wei",
                    e,
                    fallback.gas_limit,
                    fallback.gas_price
                );
                fallback
            }
        };

        let Some(amount) = compute_transferable(
            self.asset,
            balance,
            &fee,
            self.config.reserve,
            self.config.fee_margin_percent,
        ) else {
            return Ok(self.fail(
                trigger,
                None,
                SweeperError::InsufficientFunds(format!(
                    "insufficient balance after fee/reserve (balance {} wei, fee {} wei)",
                    balance,
                    fee.fee_with_margin(self.config.fee_margin_percent)
                )),
            ));
        };

        let request = ForwardRequest {
            amount,
            ..probe
        };
        let gas_limit = fee.gas_limit_with_margin(self.config.fee_margin_percent);
        tracing::info!(
            "[SweepEngine] Forwarding {} of {} to {:?} (gas limit {}, gas price {})",
            amount,
            self.asset.label(),
            self.destination,
            gas_limit,
            fee.gas_price
        );
        let forward_tx = match self
            .client
            .submit_forward(&request, gas_limit, fee.gas_price)
            .await
        {
            Ok(tx) => tx,
            Err(e) => return Ok(self.fail(trigger, None, e)),
        };
        tracing::info!("[SweepEngine] Submitted forward transaction {:?}", forward_tx);

        let timeout_secs = self.config.confirmation_timeout_secs;
        let wait = self
            .client
            .wait_for_confirmation(forward_tx, self.config.confirmations);
        let outcome = match tokio::time::timeout(Duration::from_secs(timeout_secs), wait).await {
            Ok(Ok(receipt)) => {
                tracing::info!(
                    "[SweepEngine] Forward {:?} confirmed in block {:?}",
                    forward_tx,
                    receipt.block_number
                );
                SweepOutcome::processed(trigger, Some(forward_tx), Some(amount))
            }
            Ok(Err(e @ SweeperError::TxReverted(_))) => self.fail(trigger, Some(forward_tx), e),
            Ok(Err(e)) => self.ambiguous(trigger, forward_tx, amount, e),
            Err(_) => self.ambiguous(
                trigger,
                forward_tx,
                amount,
                SweeperError::ConfirmationTimeout {
                    tx_hash: forward_tx,
                    timeout_secs,
                },
            ),
        };
        Ok(outcome)
    }

    fn fail(
        &self,
        trigger: Option<TxHash>,
        forward_tx: Option<TxHash>,
        error: SweeperError,
    ) -> SweepOutcome {
        tracing::error!("[SweepEngine] Sweep for {:?} failed: {}", trigger, error);
        self.metrics
            .sweep_errors
            .with_label_values(&[error.error_type()])
            .inc();
        SweepOutcome::failed(trigger, forward_tx, error.to_string())
    }

    // Not retried: the transaction may still land.
    fn ambiguous(
        &self,
        trigger: Option<TxHash>,
        forward_tx: TxHash,
        amount: U256,
        error: SweeperError,
    ) -> SweepOutcome {
        tracing::warn!(
            "[SweepEngine] Forward {:?} for {:?} has unknown status, check it manually: {}",
            forward_tx,
            trigger,
            error
        );
        self.metrics
            .sweep_errors
            .with_label_values(&[error.error_type()])
            .inc();
        SweepOutcome::ambiguous(trigger, forward_tx, amount, error.to_string())
    }
}
