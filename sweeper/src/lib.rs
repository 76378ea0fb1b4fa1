// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments, clippy::new_without_default)]

pub mod config;
pub mod error;
pub mod eth_client;
pub mod keys;
pub mod ledger_client;
pub mod metered_eth_provider;
pub mod metrics;
pub mod node;
pub mod orchestrator;
pub mod scanner;
pub mod server;
pub mod storage;
pub mod supervisor;
pub mod sweep;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod ledger_mock_client;

#[cfg(test)]
pub mod test_utils;
