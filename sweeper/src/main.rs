// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use deposit_sweeper::config::SweeperNodeConfig;
use deposit_sweeper::node::SweeperNode;
use deposit_sweeper::telemetry::init_logging;
use deposit_sweeper::types::SweepStatus;
use std::path::PathBuf;
use sweeper_config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Emit logs as JSON lines
    #[clap(long, default_value_t = false)]
    pub json_logs: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Scan the blocks since the checkpoint once and forward new deposits
    RunOnce,
    /// Print balances, statistics and the checkpoint
    Status,
    /// Forward the current balance right away
    Forward,
    /// Follow incoming transfers over the websocket endpoint
    Watch,
    /// Serve the HTTP trigger endpoints
    Serve,
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Received ctrl-c, shutting down");
        token.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;

    let config = SweeperNodeConfig::load(&args.config_path)?;
    let registry = prometheus::Registry::new();
    let node = SweeperNode::start(config, registry).await?;

    match args.command {
        Command::RunOnce => print_json(&node.run_once().await?),
        Command::Status => print_json(&node.status().await?),
        Command::Forward => {
            let detail = node.forward().await;
            print_json(&detail)?;
            if detail.status == SweepStatus::Failed {
                anyhow::bail!(
                    "Forward failed: {}",
                    detail.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Command::Watch => node.watch(cancel_on_ctrl_c()).await,
        Command::Serve => node.serve(cancel_on_ctrl_c()).await,
    }
}
