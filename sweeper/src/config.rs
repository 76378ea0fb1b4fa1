// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{SweeperError, SweeperResult};
use crate::keys::wallet_from_secret;
use crate::scanner::ScanConfig;
use crate::storage::rest_kv::DEFAULT_TTL_SECS;
use crate::storage::DEFAULT_MAX_PROCESSED;
use crate::supervisor::LiveConfig;
use crate::sweep::SweepConfig;
use crate::types::Asset;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use sweeper_config::{secret_or_env, Config};
use tracing::{info, warn};

pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
pub const DESTINATION_ADDRESS_ENV: &str = "DESTINATION_ADDRESS";
pub const CRON_SECRET_ENV: &str = "CRON_SECRET";
pub const KV_TOKEN_ENV: &str = "KV_REST_API_TOKEN";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SweeperNodeConfig {
    // Http JSON-RPC endpoint used for queries and submissions.
    pub rpc_url: String,
    // Websocket endpoint, only needed in watch mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    // Refuse to start when the node reports another chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // Hex private key or mnemonic. Falls back to PRIVATE_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_secret: Option<String>,
    // Falls back to DESTINATION_ADDRESS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    #[serde(default)]
    pub asset: Asset,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config for SweeperNodeConfig {}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageConfig {
    #[serde(rename_all = "kebab-case")]
    Memory {
        #[serde(default = "default_max_processed")]
        max_processed: usize,
    },
    #[serde(rename_all = "kebab-case")]
    File {
        path: PathBuf,
        #[serde(default = "default_max_processed")]
        max_processed: usize,
    },
    #[serde(rename_all = "kebab-case")]
    RestKv {
        url: String,
        // Falls back to KV_REST_API_TOKEN.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default = "default_ttl_secs")]
        ttl_secs: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: PathBuf::from("sweeper-state.json"),
            max_processed: DEFAULT_MAX_PROCESSED,
        }
    }
}

fn default_max_processed() -> usize {
    DEFAULT_MAX_PROCESSED
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,
    // Bearer token for the trigger endpoints. Falls back to CRON_SECRET.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_secret: Option<String>,
    // Run a cycle on this period while serving.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            cron_secret: None,
            schedule_interval_secs: None,
        }
    }
}

/// Fully resolved settings: secrets loaded, addresses parsed.
pub struct SweeperServerConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub expected_chain_id: Option<u64>,
    pub wallet: LocalWallet,
    pub account: Address,
    pub destination: Address,
    pub asset: Asset,
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub sweep: SweepConfig,
    pub live: LiveConfig,
    pub listen_address: SocketAddr,
    pub cron_secret: Option<String>,
    pub schedule_interval: Option<Duration>,
}

impl SweeperNodeConfig {
    /// Resolves secrets from the file or the environment and checks every
    /// value that can be checked without a network connection.
    pub fn validate(&self) -> SweeperResult<SweeperServerConfig> {
        info!("Starting config validation");
        url::Url::parse(&self.rpc_url)
            .map_err(|e| SweeperError::ConfigError(format!("Invalid rpc-url: {}", e)))?;
        if let Some(ws_url) = &self.ws_url {
            url::Url::parse(ws_url)
                .map_err(|e| SweeperError::ConfigError(format!("Invalid ws-url: {}", e)))?;
        }

        let secret = secret_or_env(self.signer_secret.as_deref(), PRIVATE_KEY_ENV)
            .ok_or_else(|| {
                SweeperError::ConfigError(format!(
                    "Missing signer secret: set signer-secret or {}",
                    PRIVATE_KEY_ENV
                ))
            })?;
        let wallet = wallet_from_secret(&secret)?;
        let account = wallet.address();

        let destination =
            secret_or_env(self.destination_address.as_deref(), DESTINATION_ADDRESS_ENV)
                .ok_or_else(|| {
                    SweeperError::ConfigError(format!(
                        "Missing destination address: set destination-address or {}",
                        DESTINATION_ADDRESS_ENV
                    ))
                })?;
        let destination = Address::from_str(&destination).map_err(|e| {
            SweeperError::ConfigError(format!("Invalid destination address {}: {}", destination, e))
        })?;
        if destination == account {
            return Err(SweeperError::ConfigError(
                "Destination address is the monitored account".into(),
            ));
        }

        let storage = match &self.storage {
            StorageConfig::RestKv {
                url: kv_url,
                token,
                ttl_secs,
            } => {
                url::Url::parse(kv_url).map_err(|e| {
                    SweeperError::ConfigError(format!("Invalid storage url: {}", e))
                })?;
                let token = secret_or_env(token.as_deref(), KV_TOKEN_ENV).ok_or_else(|| {
                    SweeperError::ConfigError(format!(
                        "Missing rest-kv token: set storage.token or {}",
                        KV_TOKEN_ENV
                    ))
                })?;
                StorageConfig::RestKv {
                    url: kv_url.clone(),
                    token: Some(token),
                    ttl_secs: *ttl_secs,
                }
            }
            StorageConfig::Memory { max_processed } | StorageConfig::File { max_processed, .. }
                if *max_processed == 0 =>
            {
                return Err(SweeperError::ConfigError(
                    "storage max-processed must be at least 1".into(),
                ));
            }
            other => other.clone(),
        };

        if self.scan.max_block_range == 0 {
            return Err(SweeperError::ConfigError(
                "scan max-block-range must be at least 1".into(),
            ));
        }
        if self.sweep.confirmations == 0 {
            return Err(SweeperError::ConfigError(
                "sweep confirmations must be at least 1".into(),
            ));
        }

        let cron_secret = secret_or_env(self.server.cron_secret.as_deref(), CRON_SECRET_ENV);
        if cron_secret.is_none() {
            warn!("No cron secret configured, trigger endpoints will reject every request");
        }

        info!(
            "Config validation complete: monitoring {:?} ({}), forwarding to {:?}",
            account,
            self.asset.label(),
            destination
        );
        Ok(SweeperServerConfig {
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            expected_chain_id: self.expected_chain_id,
            wallet,
            account,
            destination,
            asset: self.asset,
            storage,
            scan: self.scan,
            sweep: self.sweep.clone(),
            live: self.live,
            listen_address: self.server.listen_address,
            cron_secret,
            schedule_interval: self.server.schedule_interval_secs.map(Duration::from_secs),
        })
    }
}
