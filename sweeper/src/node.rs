// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::SweeperNodeConfig;
use crate::eth_client::EthLedgerClient;
use crate::metrics::SweeperMetrics;
use crate::orchestrator::SweepOrchestrator;
use crate::server::{handler::SweeperRequestHandler, run_server, ServerContext};
use crate::storage::build_storage;
use crate::supervisor::health::AccountHealth;
use crate::supervisor::{reconcile_loop, LiveConfig, LiveSupervisor, SweeperWatchDog};
use crate::types::{CycleReport, EventDetail, StatusReport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything a running mode needs, wired from a validated config.
pub struct SweeperNode {
    orchestrator: Arc<SweepOrchestrator>,
    metrics: Arc<SweeperMetrics>,
    registry: prometheus::Registry,
    live: LiveConfig,
    ws_configured: bool,
    listen_address: SocketAddr,
    cron_secret: Option<String>,
    schedule_interval: Option<Duration>,
}

impl SweeperNode {
    /// Validates `config`, connects to the node and opens the state backend.
    pub async fn start(
        config: SweeperNodeConfig,
        registry: prometheus::Registry,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(SweeperMetrics::new(&registry));
        let server_config = config.validate()?;

        let client = Arc::new(
            EthLedgerClient::new(
                &server_config.rpc_url,
                server_config.ws_url.clone(),
                server_config.wallet,
                server_config.expected_chain_id,
                metrics.clone(),
            )
            .await?,
        );
        let storage = build_storage(&server_config.storage)?;
        info!("[Node] Using {} state backend", storage.backend());

        let orchestrator = SweepOrchestrator::new(
            client,
            storage,
            server_config.asset,
            server_config.account,
            server_config.destination,
            server_config.scan,
            server_config.sweep,
            metrics.clone(),
        )
        .with_live_settle_delay(Duration::from_secs(server_config.live.settle_delay_secs));

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            metrics,
            registry,
            live: server_config.live,
            ws_configured: server_config.ws_url.is_some(),
            listen_address: server_config.listen_address,
            cron_secret: server_config.cron_secret,
            schedule_interval: server_config.schedule_interval,
        })
    }

    pub async fn run_once(&self) -> anyhow::Result<CycleReport> {
        Ok(self.orchestrator.run_cycle().await?)
    }

    pub async fn status(&self) -> anyhow::Result<StatusReport> {
        Ok(self.orchestrator.status().await?)
    }

    pub async fn forward(&self) -> EventDetail {
        let outcome = self.orchestrator.forward_now().await;
        outcome.to_detail(self.orchestrator.decimals().await)
    }

    fn health(&self) -> AccountHealth {
        AccountHealth::new(
            self.orchestrator.client(),
            self.orchestrator.asset(),
            self.orchestrator.account(),
            self.metrics.clone(),
            Duration::from_secs(self.live.health_check_interval_secs),
        )
    }

    /// Follows incoming transfers live until `cancel` fires or the
    /// reconnect budget runs out.
    pub async fn watch(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        if !self.ws_configured {
            anyhow::bail!("watch mode requires ws-url");
        }
        let watchdog_cancel = cancel.child_token();
        let watchdog = tokio::spawn(
            SweeperWatchDog::new(vec![Box::new(self.health())]).run(watchdog_cancel.clone()),
        );

        let result = LiveSupervisor::new(self.orchestrator.clone(), self.live, self.metrics.clone())
            .run(cancel)
            .await;

        watchdog_cancel.cancel();
        let _ = watchdog.await;
        Ok(result?)
    }

    /// Serves the HTTP trigger endpoints until `cancel` fires.
    pub async fn serve(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let context = Arc::new(ServerContext::new(
            self.cron_secret.clone(),
            self.registry.clone(),
        ));
        let server = run_server(
            &self.listen_address,
            SweeperRequestHandler::new(self.orchestrator.clone()),
            self.metrics.clone(),
            context,
            cancel.clone(),
        )
        .await?;

        let mut handles = vec![tokio::spawn(
            SweeperWatchDog::new(vec![Box::new(self.health())]).run(cancel.clone()),
        )];
        if let Some(period) = self.schedule_interval {
            info!("[Node] Scheduling a cycle every {:?}", period);
            handles.push(tokio::spawn(reconcile_loop(
                self.orchestrator.clone(),
                period,
                cancel.clone(),
            )));
        }

        server
            .await
            .map_err(|e| anyhow::anyhow!("Server task join error: {}", e))?;
        cancel.cancel();
        futures::future::join_all(handles).await;
        Ok(())
    }
}

#[cfg(test)]
impl SweeperNode {
    pub(crate) fn for_testing(
        orchestrator: Arc<SweepOrchestrator>,
        metrics: Arc<SweeperMetrics>,
        live: LiveConfig,
        ws_configured: bool,
    ) -> Self {
        Self {
            orchestrator,
            metrics,
            registry: prometheus::Registry::new(),
            live,
            ws_configured,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            cron_secret: None,
            schedule_interval: Some(Duration::from_millis(20)),
        }
    }
}
