// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parking-Lock Gateway
//!
//! Bridges field-deployed parking-lock devices (persistent TCP, binary
//! framing) to an operator-facing JSON HTTP API, forwarding heartbeat
//! telemetry to an external webhook.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (devices on 11457, operator API on 5000)
//! parklock-gateway
//!
//! # Custom ports and config file
//! parklock-gateway --port 12000 --http-port 8080 --config gateway.json
//! ```
//!
//! `NODE_WEBHOOK_URL` and `LOCK_WEBHOOK_SECRET` override the webhook
//! destination and shared secret from the environment.

use clap::Parser;
use parklock_gateway::api::{self, AppState};
use parklock_gateway::{GatewayConfig, LockServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Parking-lock gateway - TCP device server with an HTTP control plane
#[derive(Parser, Debug)]
#[command(name = "parklock-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device-facing TCP port
    #[arg(short, long, default_value = "11457")]
    port: u16,

    /// Device-facing bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Operator HTTP port
    #[arg(long, default_value = "5000")]
    http_port: u16,

    /// Operator HTTP bind address
    #[arg(long, default_value = "0.0.0.0")]
    http_bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let mut config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        GatewayConfig::from_file(&config_path)?
    } else {
        GatewayConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            http_bind_address: args.http_bind.parse()?,
            http_port: args.http_port,
            ..Default::default()
        }
    };
    config.apply_env();

    info!("+----------------------------------------------------+");
    info!(
        "|       Parking-Lock Gateway v{}                  |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Devices:  {:39} |",
        format!("{}:{}", config.bind_address, config.port)
    );
    info!(
        "|  Operator: {:39} |",
        format!("{}:{}", config.http_bind_address, config.http_port)
    );
    info!("|  Webhook:  {:39} |", config.webhook_url);
    info!("+----------------------------------------------------+");

    let http_addr = format!("{}:{}", config.http_bind_address, config.http_port);

    // Create the gateway core and bring the device listener up.
    let server = LockServer::new(config)?;
    server.start().await?;

    // Operator HTTP facade.
    let state = Arc::new(AppState::new(server.clone()));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    info!("Operator HTTP API on http://{}", listener.local_addr()?);

    let shutdown_server = server.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received, stopping gateway...");
            shutdown_server.shutdown().await;
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
