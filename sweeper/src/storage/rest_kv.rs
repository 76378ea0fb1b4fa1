// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client for a Redis-compatible REST key-value service (Upstash style).
//! Each command is a `POST` of a JSON array such as `["SET","k","v"]`,
//! answered with `{"result": ...}` or `{"error": "..."}`.

use super::{Storage, StorageInfo};
use crate::error::{SweeperError, SweeperResult};
use crate::types::{tx_key, Statistics, StatsUpdate};
use async_trait::async_trait;
use ethers::types::TxHash;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const CHECKPOINT_KEY: &str = "lastCheckedBlock";
const STATS_KEY: &str = "stats";
const PROCESSED_PREFIX: &str = "processed:";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RestKvStorage {
    client: reqwest::Client,
    url: String,
    token: String,
    ttl_secs: u64,
}

impl RestKvStorage {
    pub fn new(url: String, token: Option<String>, ttl_secs: u64) -> SweeperResult<Self> {
        let token = token.ok_or_else(|| {
            SweeperError::ConfigError("rest-kv storage requires a token".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SweeperError::ConfigError(format!("Failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            url,
            token,
            ttl_secs,
        })
    }

    fn processed_key(tx_hash: &TxHash) -> String {
        format!("{}{}", PROCESSED_PREFIX, tx_key(tx_hash))
    }

    async fn command(&self, args: &[&str]) -> SweeperResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| SweeperError::StorageError(format!("KV request failed: {}", e)))?;
        let status = response.status();
        let body: CommandResponse = response.json().await.map_err(|e| {
            SweeperError::StorageError(format!("KV response ({}) unreadable: {}", status, e))
        })?;
        if let Some(error) = body.error {
            return Err(SweeperError::StorageError(format!(
                "KV command {} failed: {}",
                args.first().unwrap_or(&""),
                error
            )));
        }
        if !status.is_success() {
            return Err(SweeperError::StorageError(format!(
                "KV service returned {}",
                status
            )));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Storage for RestKvStorage {
    fn backend(&self) -> &'static str {
        "rest-kv"
    }

    async fn get_checkpoint(&self) -> SweeperResult<u64> {
        let value = self.command(&["GET", CHECKPOINT_KEY]).await?;
        if value.is_null() {
            return Ok(0);
        }
        value_as_u64(&value).ok_or_else(|| {
            SweeperError::StorageError(format!("Stored checkpoint is not a number: {}", value))
        })
    }

    async fn set_checkpoint(&self, height: u64) -> SweeperResult<()> {
        let height = height.to_string();
        self.command(&["SET", CHECKPOINT_KEY, &height]).await?;
        Ok(())
    }

    async fn is_processed(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        let value = self
            .command(&["EXISTS", &Self::processed_key(tx_hash)])
            .await?;
        Ok(value_as_u64(&value).unwrap_or(0) > 0)
    }

    async fn mark_processed(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        let ttl = self.ttl_secs.to_string();
        self.command(&["SET", &Self::processed_key(tx_hash), "1", "EX", &ttl])
            .await?;
        Ok(())
    }

    async fn claim(&self, tx_hash: &TxHash) -> SweeperResult<bool> {
        let ttl = self.ttl_secs.to_string();
        let value = self
            .command(&["SET", &Self::processed_key(tx_hash), "1", "NX", "EX", &ttl])
            .await?;
        // NX answers null when the key already exists
        Ok(!value.is_null())
    }

    async fn release(&self, tx_hash: &TxHash) -> SweeperResult<()> {
        self.command(&["DEL", &Self::processed_key(tx_hash)])
            .await?;
        Ok(())
    }

    async fn get_stats(&self) -> SweeperResult<Statistics> {
        match self.command(&["GET", STATS_KEY]).await? {
            Value::String(s) => Ok(serde_json::from_str(&s)?),
            Value::Null => Ok(Statistics::default()),
            other => Err(SweeperError::StorageError(format!(
                "Unexpected stats value: {}",
                other
            ))),
        }
    }

    async fn update_stats(&self, update: StatsUpdate) -> SweeperResult<Statistics> {
        let mut stats = self.get_stats().await?;
        stats.merge(update);
        let encoded = serde_json::to_string(&stats)?;
        self.command(&["SET", STATS_KEY, &encoded]).await?;
        Ok(stats)
    }

    async fn info(&self) -> SweeperResult<StorageInfo> {
        Ok(StorageInfo {
            backend: self.backend().to_string(),
            last_checked_block: self.get_checkpoint().await?,
            processed_count: None,
            stats: self.get_stats().await?,
        })
    }
}
