// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Live mode: a long-lived transfer subscription that is re-established when
//! it drops, a single handler task that sweeps deposits and runs reconcile
//! cycles one at a time, and a watchdog running periodic observations.

pub mod health;

use crate::error::{SweeperError, SweeperResult};
use crate::metrics::SweeperMetrics;
use crate::orchestrator::SweepOrchestrator;
use crate::types::TransferEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_CHANNEL_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LiveConfig {
    pub reconnect_delay_secs: u64,
    /// Budget of consecutive failed subscriptions, reset by every
    /// successful one. `None` keeps reconnecting forever
    pub max_reconnects: Option<u32>,
    pub health_check_interval_secs: u64,
    pub settle_delay_secs: u64,
    /// Periodic scan-and-forward cycle to pick up deposits missed while
    /// disconnected
    pub reconcile_interval_secs: Option<u64>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 10,
            max_reconnects: None,
            health_check_interval_secs: 60,
            settle_delay_secs: 5,
            reconcile_interval_secs: None,
        }
    }
}

#[async_trait]
pub trait Observable {
    fn name(&self) -> &str;

    async fn observe_and_report(&self);

    fn interval(&self) -> Duration;
}

pub struct SweeperWatchDog {
    observables: Vec<Box<dyn Observable + Send + Sync>>,
}

impl SweeperWatchDog {
    pub fn new(observables: Vec<Box<dyn Observable + Send + Sync>>) -> Self {
        Self { observables }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let handles: Vec<_> = self
            .observables
            .into_iter()
            .map(|observable| tokio::spawn(Self::run_observer(observable, cancel.clone())))
            .collect();
        futures::future::join_all(handles).await;
    }

    async fn run_observer(
        observable: Box<dyn Observable + Send + Sync>,
        cancel: CancellationToken,
    ) {
        let mut timer = tokio::time::interval(observable.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[WatchDog] {} stopped", observable.name());
                    break;
                }
                _ = timer.tick() => {
                    observable.observe_and_report().await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Subscribed { attempt: u32 },
    Deposit(TransferEvent),
    Disconnected { reason: String },
    Reconcile,
}

pub struct LiveSupervisor {
    orchestrator: Arc<SweepOrchestrator>,
    config: LiveConfig,
    metrics: Arc<SweeperMetrics>,
}

impl LiveSupervisor {
    pub fn new(
        orchestrator: Arc<SweepOrchestrator>,
        config: LiveConfig,
        metrics: Arc<SweeperMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            config,
            metrics,
        }
    }

    /// Runs until `cancel` fires or the reconnect budget is spent. Events
    /// already queued are handled before returning.
    pub async fn run(self, cancel: CancellationToken) -> SweeperResult<()> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let reconcile_pending = Arc::new(AtomicBool::new(false));
        let handler = tokio::spawn(handle_events(
            self.orchestrator.clone(),
            rx,
            reconcile_pending.clone(),
        ));

        let tasks = cancel.child_token();
        let reconcile = self.config.reconcile_interval_secs.map(|secs| {
            tokio::spawn(reconcile_ticker(
                tx.clone(),
                Duration::from_secs(secs),
                reconcile_pending,
                tasks.clone(),
            ))
        });

        let result = self.subscription_loop(tx, cancel).await;

        tasks.cancel();
        if let Some(reconcile) = reconcile {
            let _ = reconcile.await;
        }
        if let Err(e) = handler.await {
            error!("[Supervisor] Event handler panicked: {:?}", e);
        }
        result
    }

    async fn subscription_loop(
        &self,
        tx: mpsc::Sender<SupervisorEvent>,
        cancel: CancellationToken,
    ) -> SweeperResult<()> {
        let client = self.orchestrator.client();
        let asset = self.orchestrator.asset();
        let account = self.orchestrator.account();
        let mut attempt: u32 = 0;
        let mut reconnects: u32 = 0;

        loop {
            attempt += 1;
            let reason = match client.subscribe_transfers(asset, account).await {
                Ok(mut transfers) => {
                    info!(
                        "[Supervisor] Subscribed to {} transfers of {:?} (attempt {})",
                        asset.label(),
                        account,
                        attempt
                    );
                    reconnects = 0;
                    let _ = tx.send(SupervisorEvent::Subscribed { attempt }).await;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                info!("[Supervisor] Shutting down");
                                return Ok(());
                            }
                            transfer = transfers.recv() => match transfer {
                                Some(event) => {
                                    if tx.send(SupervisorEvent::Deposit(event)).await.is_err() {
                                        return Err(SweeperError::Generic(
                                            "Deposit handler stopped".into(),
                                        ));
                                    }
                                }
                                None => break "subscription closed".to_string(),
                            }
                        }
                    }
                }
                Err(e) => e.to_string(),
            };
            let _ = tx
                .send(SupervisorEvent::Disconnected {
                    reason: reason.clone(),
                })
                .await;

            reconnects += 1;
            if let Some(max) = self.config.max_reconnects {
                if reconnects > max {
                    return Err(SweeperError::SubscriptionError(format!(
                        "Giving up after {} consecutive reconnect attempts, last error: {}",
                        max, reason
                    )));
                }
            }
            self.metrics.subscription_reconnects.inc();
            let delay = Duration::from_secs(self.config.reconnect_delay_secs);
            warn!(
                "[Supervisor] Subscription lost ({}), reconnecting in {:?}",
                reason, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Single consumer of supervisor events, so deposits and reconcile cycles
/// never run concurrently. Exits once every sender is gone and the queue is
/// empty.
async fn handle_events(
    orchestrator: Arc<SweepOrchestrator>,
    mut rx: mpsc::Receiver<SupervisorEvent>,
    reconcile_pending: Arc<AtomicBool>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SupervisorEvent::Subscribed { attempt } => {
                info!("[Supervisor] Listening for deposits (attempt {})", attempt)
            }
            SupervisorEvent::Deposit(transfer) => {
                match orchestrator.handle_live_deposit(&transfer).await {
                    Ok(Some(outcome)) => info!(
                        "[Supervisor] Deposit {:?} -> {} (forward {:?})",
                        transfer.tx_hash,
                        outcome.status.as_str(),
                        outcome.forward_tx
                    ),
                    Ok(None) => {}
                    Err(e) => error!(
                        "[Supervisor] Failed to handle deposit {:?}: {}",
                        transfer.tx_hash, e
                    ),
                }
            }
            SupervisorEvent::Disconnected { reason } => {
                warn!("[Supervisor] Disconnected: {}", reason)
            }
            SupervisorEvent::Reconcile => {
                reconcile_pending.store(false, Ordering::SeqCst);
                if let Err(e) = orchestrator.run_cycle().await {
                    warn!("[Supervisor] Reconcile cycle failed: {}", e);
                }
            }
        }
    }
}

/// Queues a reconcile cycle every `period` until `cancel` fires. A tick is
/// dropped while an earlier cycle is still waiting in the queue.
async fn reconcile_ticker(
    tx: mpsc::Sender<SupervisorEvent>,
    period: Duration,
    pending: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                if pending.swap(true, Ordering::SeqCst) {
                    continue;
                }
                if tx.send(SupervisorEvent::Reconcile).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Runs a scan-and-forward cycle every `period` until `cancel` fires.
pub async fn reconcile_loop(
    orchestrator: Arc<SweepOrchestrator>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                if let Err(e) = orchestrator.run_cycle().await {
                    warn!("[Supervisor] Reconcile cycle failed: {}", e);
                }
            }
        }
    }
}
