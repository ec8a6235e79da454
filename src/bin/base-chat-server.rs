// ABOUTME: Server binary for the Base Chat conversation orchestration engine
// ABOUTME: Loads configuration, applies command-line overrides and serves HTTP until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # Base Chat Server Binary
//!
//! Starts the HTTP server for web, widget and Slack chat surfaces.

use std::sync::Arc;

use anyhow::Result;
use base_chat::{
    config::{DatabaseUrl, ServerConfig},
    logging,
    resources::ServerResources,
    server::ChatServer,
};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "base-chat-server")]
#[command(about = "Base Chat - grounded answers over your organization's knowledge base")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL (`sqlite:./data/base-chat.db` or `sqlite::memory:`)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database = DatabaseUrl::parse_url(&database_url);
    }

    info!("Starting Base Chat server");
    config.log_summary();

    let resources = Arc::new(ServerResources::from_config(Arc::new(config)).await?);
    if let Err(e) = ChatServer::new(resources).run().await {
        error!(error = %e, "Server terminated with an error");
        return Err(e);
    }
    Ok(())
}
