//! Tool announcements from connected bridges.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::AppState;

/// Body of `POST /register/{client_id}`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub tools: Vec<Value>,
}

/// `POST /register/{client_id}` — store the client's tool list, replacing any
/// earlier announcement.
pub async fn register(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Json<Value> {
    let count = req.tools.len();
    let names: Vec<&str> = req
        .tools
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    info!("Client {client_id} registered {count} tools: {names:?}");
    state.hub.register_tools(&client_id, req.tools).await;
    Json(json!({"status": "registered", "count": count}))
}

/// `GET /tools/{client_id}` — last announced tool list.
pub async fn list(State(state): State<AppState>, Path(client_id): Path<String>) -> Response {
    match state.hub.tools(&client_id).await {
        Some(tools) => Json(json!({"tools": tools})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Client '{client_id}' has not registered tools"),
                "code": "TOOLS_NOT_FOUND",
            })),
        )
            .into_response(),
    }
}
