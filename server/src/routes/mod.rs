//! HTTP route handlers.
//!
//! Each sub-module corresponds to an endpoint group. There is no
//! authentication; the server is meant to sit on a trusted network next to
//! the agent that drives it.

pub mod commands;
pub mod connect;
pub mod health;
pub mod tools;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/connect/{client_id}", get(connect::connect))
        .route("/result/{client_id}", post(commands::result))
        .route("/command/{client_id}", post(commands::command))
        .route(
            "/test/send_command/{client_id}",
            post(commands::test_send_command),
        )
        .route("/register/{client_id}", post(tools::register))
        .route("/tools/{client_id}", get(tools::list))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
