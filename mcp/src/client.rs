//! HTTP client for the control server.
//!
//! [`RemoteClient`] wraps `reqwest::Client` and knows the three endpoints
//! scoped to this bridge's client id:
//!
//! | Method | Path                    | Purpose                    |
//! |--------|-------------------------|----------------------------|
//! | GET    | `/connect/{client_id}`  | SSE command stream         |
//! | POST   | `/result/{client_id}`   | Command result             |
//! | POST   | `/register/{client_id}` | One-shot tool announcement |
//!
//! Outbound posts are single best-effort calls. Response bodies are returned
//! for logging and never interpreted further: a non-JSON body comes back as
//! a JSON string.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::dispatcher::CommandResult;
use crate::tools::ToolDefinition;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination for command results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one result. Failures are handled (logged) by the sink.
    async fn report(&self, result: CommandResult);
}

/// HTTP client for one control server and client id.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl RemoteClient {
    pub fn new(base_url: &str, client_id: &str) -> Result<Self, ClientError> {
        // No overall timeout: the SSE response body lives as long as the connection.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ClientError::Request)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
        })
    }

    pub fn connect_url(&self) -> String {
        format!("{}/connect/{}", self.base_url, self.client_id)
    }

    /// `GET /connect/{client_id}` — open the event stream.
    ///
    /// Returns the streaming response once the server accepted it.
    pub async fn open_stream(&self) -> Result<reqwest::Response, ClientError> {
        let resp = self
            .http
            .get(self.connect_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(ClientError::Request)?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// `POST /result/{client_id}` — deliver one command result.
    pub async fn post_result(&self, result: &CommandResult) -> Result<Value, ClientError> {
        let resp = self
            .http
            .post(format!("{}/result/{}", self.base_url, self.client_id))
            .timeout(REQUEST_TIMEOUT)
            .json(result)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_response(resp).await
    }

    /// `POST /register/{client_id}` — announce the available tools.
    pub async fn register_tools(&self, tools: &[ToolDefinition]) -> Result<Value, ClientError> {
        let resp = self
            .http
            .post(format!("{}/register/{}", self.base_url, self.client_id))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "tools": tools }))
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_response(resp).await
    }

    /// Read the body of a response: JSON when it parses, a string otherwise.
    /// Non-2xx statuses become [`ClientError::Remote`].
    async fn handle_response(resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ClientError::Request)?;

        if status.is_success() {
            Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
        } else {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(String::from))
                .unwrap_or(body);
            Err(ClientError::Remote {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ResultSink for RemoteClient {
    async fn report(&self, result: CommandResult) {
        match self.post_result(&result).await {
            Ok(body) => info!("Result sent for command {}: {}", result.command_id, body),
            Err(e) => warn!("Failed to send result for command {}: {}", result.command_id, e),
        }
    }
}

/// Errors returned by [`RemoteClient`] methods.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    Request(reqwest::Error),
    /// The control server returned a non-2xx HTTP status.
    Remote { status: u16, message: String },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Remote { status, message } => {
                write!(f, "Server error (HTTP {}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn record(
        State(seen): State<Seen>,
        Path(client_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        seen.lock().await.push((client_id, body));
        Json(json!({ "status": "received" }))
    }

    #[test]
    fn urls_are_scoped_to_client_id() {
        let client = RemoteClient::new("http://relay:8000/", "desk-1").unwrap();
        assert_eq!(client.connect_url(), "http://relay:8000/connect/desk-1");
    }

    #[tokio::test]
    async fn post_result_sends_camel_case_body() {
        let seen: Seen = Arc::default();
        let base = serve(
            Router::new()
                .route("/result/{client_id}", post(record))
                .with_state(Arc::clone(&seen)),
        )
        .await;

        let client = RemoteClient::new(&base, "c-1").unwrap();
        let body = client
            .post_result(&CommandResult {
                command_id: "c1".into(),
                result: json!({"ok": true}),
            })
            .await
            .unwrap();
        assert_eq!(body["status"], "received");

        let seen = seen.lock().await;
        assert_eq!(seen[0].0, "c-1");
        assert_eq!(seen[0].1, json!({"commandId": "c1", "result": {"ok": true}}));
    }

    #[tokio::test]
    async fn register_tools_wraps_definitions() {
        let seen: Seen = Arc::default();
        let base = serve(
            Router::new()
                .route("/register/{client_id}", post(record))
                .with_state(Arc::clone(&seen)),
        )
        .await;

        let client = RemoteClient::new(&base, "c-1").unwrap();
        let def = ToolDefinition {
            name: "browser_close".into(),
            display_name: "Browser Close".into(),
            description: String::new(),
            parameters: json!({"type": "object", "properties": {}}),
        };
        client.register_tools(&[def]).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen[0].1["tools"][0]["display_name"], "Browser Close");
    }

    #[tokio::test]
    async fn error_status_and_plain_bodies() {
        let base = serve(
            Router::new()
                .route(
                    "/result/{client_id}",
                    post(|| async { (StatusCode::BAD_REQUEST, Json(json!({"error": "nope"}))) }),
                )
                .route("/register/{client_id}", post(|| async { "thanks" })),
        )
        .await;

        let client = RemoteClient::new(&base, "c-1").unwrap();
        let err = client
            .post_result(&CommandResult {
                command_id: "c1".into(),
                result: Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote { status: 400, ref message } if message == "nope"));

        let body = client.register_tools(&[]).await.unwrap();
        assert_eq!(body, json!("thanks"));
    }

    #[tokio::test]
    async fn open_stream_rejects_non_success() {
        let base = serve(Router::new()).await;
        let client = RemoteClient::new(&base, "c-1").unwrap();
        let err = client.open_stream().await.unwrap_err();
        assert!(matches!(err, ClientError::Remote { status: 404, .. }));
    }
}
