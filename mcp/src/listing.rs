//! Local tool-listing endpoint (development aid).
//!
//! `GET /tools` returns `{"tools": [...]}` with the same definitions that
//! are announced to the control server. CORS is wide open so a browser
//! page on any origin can read it.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::tools::ToolDefinition;

/// Shared, replaceable list of tool definitions.
#[derive(Clone, Default)]
pub struct ToolListing {
    tools: Arc<RwLock<Vec<ToolDefinition>>>,
}

impl ToolListing {
    /// Replace the served definitions with a new registry snapshot.
    pub async fn publish(&self, tools: Vec<ToolDefinition>) {
        *self.tools.write().await = tools;
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tools", get(list_tools))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Bind `listen` and serve in the background.
    pub async fn serve(&self, listen: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(listen).await?;
        info!("Tool listing available at http://{}/tools", listener.local_addr()?);
        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Tool listing server stopped: {e}");
            }
        });
        Ok(())
    }
}

async fn list_tools(State(listing): State<ToolListing>) -> Json<Value> {
    let tools = listing.tools.read().await;
    Json(json!({ "tools": *tools }))
}
