#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # toolrelay
//!
//! Control server for `mcp-toolrelay` bridges.
//!
//! Bridges hold a Server-Sent Events stream open per client id; commands
//! pushed to that client are delivered as `command` events and the bridge
//! posts each result back.
//!
//! ## API surface
//!
//! | Method | Path                              | Description                              |
//! |--------|-----------------------------------|------------------------------------------|
//! | GET    | `/api/health`                     | Liveness check                           |
//! | GET    | `/connect/{client_id}`            | SSE command stream for a bridge          |
//! | POST   | `/result/{client_id}`             | Bridge posts `{commandId, result}`       |
//! | POST   | `/command/{client_id}`            | Run `{tool, params}` and wait for result |
//! | POST   | `/test/send_command/{client_id}`  | Push a raw command, fire and forget      |
//! | POST   | `/register/{client_id}`           | Bridge announces its tools               |
//! | GET    | `/tools/{client_id}`              | Last announced tools                     |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, CLI, tracing, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! state.rs         — AppState shared by handlers
//! hub.rs           — per-client queues, result waiters, tool lists
//! routes/
//!   connect.rs     — GET /connect/{client_id}
//!   commands.rs    — POST /command, /result, /test/send_command
//!   tools.rs       — POST /register, GET /tools
//!   health.rs      — GET /api/health
//! ```

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use toolrelay::{router, AppState, Config};

/// Control server that streams tool commands to connected bridges.
#[derive(Parser)]
#[command(name = "toolrelay", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Socket address to bind, overriding config and environment.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("toolrelay: configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("toolrelay v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let state = AppState::new(config);
    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            std::process::exit(1);
        }
    };

    let hub = state.hub.clone();
    let app = router(state);
    info!("Server ready");

    // Live SSE streams only end once their queues are dropped.
    let shutdown = async move {
        shutdown_signal().await;
        hub.close_all();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }
    info!("Goodbye");
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
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
    info!("Shutting down...");
}
