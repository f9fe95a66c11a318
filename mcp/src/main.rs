//! # mcp-toolrelay
//!
//! Local bridge between a remote control server and a local MCP server.
//! Subscribes to the control server's SSE stream, runs each `command`
//! event as a `tools/call` on the MCP server (spawned over stdio), and
//! posts the result back over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! main.rs        — entry point, config loading, tracing, shutdown
//! config.rs      — TOML file / env-var / CLI configuration
//! mcp.rs         — MCP JSON-RPC client over the child's stdio
//! tools.rs       — tool registry snapshot and tool definitions
//! dispatcher.rs  — command resolution, invocation, result reporting
//! client.rs      — HTTP client for the control server endpoints
//! sse.rs         — incremental Server-Sent Events decoder
//! listener.rs    — one SSE connection: open, decode, publish commands
//! bridge.rs      — reconnect loop tying the pieces together
//! listing.rs     — local `GET /tools` endpoint
//! ```
//!
//! ## Failure handling
//!
//! - Provider fails to start or to list tools: exit 1.
//! - Stream fails or ends: reconnect after a fixed delay, forever.
//! - Unknown tool or failed invocation: logged, no result posted.
//! - Result post fails: logged, not retried.

mod bridge;
mod client;
mod config;
mod dispatcher;
mod listener;
mod listing;
mod mcp;
mod sse;
mod tools;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use bridge::Bridge;
use client::RemoteClient;
use config::Cli;
use listing::ToolListing;
use mcp::McpClient;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(&cli) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("mcp-toolrelay: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("mcp-toolrelay v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Control server: {}, client id: {}",
        config.remote.host, config.remote.client_id
    );

    let provider = match McpClient::spawn(&config.provider).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to start MCP server '{}': {}", config.provider.name, e);
            std::process::exit(1);
        }
    };

    let client = match RemoteClient::new(&config.remote.host, &config.remote.client_id) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            provider.shutdown().await;
            std::process::exit(1);
        }
    };

    let listing = if config.listing.enabled {
        let listing = ToolListing::default();
        match listing.serve(&config.listing.listen).await {
            Ok(()) => Some(listing),
            Err(e) => {
                warn!(
                    "Tool listing disabled, cannot bind {}: {}",
                    config.listing.listen, e
                );
                None
            }
        }
    } else {
        None
    };

    let bridge = Bridge::new(
        Arc::clone(&config),
        provider.clone(),
        Arc::clone(&client),
        client,
        listing,
    );

    tokio::select! {
        result = bridge.run() => {
            if let Err(e) = result {
                error!("Tool provider failed: {}", e);
                provider.shutdown().await;
                std::process::exit(1);
            }
        }
        () = shutdown_signal() => {
            info!("Shutting down...");
            provider.shutdown().await;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received SIGINT");
    }
}
