//! Command submission and result collection.
//!
//! - `POST /command/{client_id}` sends `{tool, params}` under a fresh id and
//!   waits for the bridge to post the result.
//! - `POST /test/send_command/{client_id}` pushes a raw command body and
//!   returns immediately.
//! - `POST /result/{client_id}` is where bridges post `{commandId, result}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::AppState;

/// Body of `POST /command/{client_id}`.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

/// `POST /result/{client_id}` — a bridge reports a command result.
///
/// The body is logged as-is. When it carries a `commandId` someone is
/// waiting on, the `result` field is handed to that waiter.
pub async fn result(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    info!("Result from {client_id}: {body}");
    if let Some(command_id) = body["commandId"].as_str() {
        state
            .hub
            .complete(command_id, body["result"].clone())
            .await;
    }
    Json(json!({"status": "received"}))
}

/// `POST /test/send_command/{client_id}` — push a raw command to the client.
pub async fn test_send_command(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(command): Json<Value>,
) -> Json<Value> {
    let delivered = state.hub.send(&client_id, &command);
    if delivered == 0 {
        warn!("No live stream for {client_id}, command dropped");
    } else {
        info!("Command sent to {client_id} ({delivered} streams)");
    }
    Json(json!({"status": "command sent"}))
}

/// `POST /command/{client_id}` — run a tool on the client and wait for the result.
pub async fn command(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Response {
    let hub = &state.hub;
    if !hub.is_connected(&client_id) {
        return not_connected(&client_id);
    }

    let command_id = uuid::Uuid::new_v4().to_string();
    let params = if req.params.is_null() {
        json!({})
    } else {
        req.params
    };
    let command = json!({
        "id": command_id,
        "tool": req.tool,
        "params": params,
    });

    let rx = hub.expect_result(&command_id).await;
    if hub.send(&client_id, &command) == 0 {
        hub.cancel(&command_id).await;
        return not_connected(&client_id);
    }
    info!("Command {command_id} ({}) sent to {client_id}", req.tool);

    let timeout = state.config.server.command_timeout();
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => Json(json!({"commandId": command_id, "result": result})).into_response(),
        Ok(Err(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": "Result waiter dropped", "code": "RESULT_LOST"})),
        )
            .into_response(),
        Err(_) => {
            hub.cancel(&command_id).await;
            warn!("Command {command_id} timed out after {}s", timeout.as_secs());
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"error": "Client did not respond in time", "code": "TIMEOUT"})),
            )
                .into_response()
        }
    }
}

fn not_connected(client_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": format!("Client '{client_id}' not connected"),
            "code": "CLIENT_NOT_CONNECTED",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{router, AppState, Config};

    fn app(timeout_secs: u64) -> (AppState, Router) {
        let mut config = Config::default();
        config.server.command_timeout_secs = timeout_secs;
        let state = AppState::new(config);
        (state.clone(), router(state))
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn result_is_acknowledged_and_completes_waiter() {
        let (state, app) = app(60);
        let rx = state.hub.expect_result("c1").await;

        let response = app
            .oneshot(post_json(
                "/result/test-client-1",
                &json!({"commandId": "c1", "result": {"content": []}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "received"}));
        assert_eq!(rx.await.unwrap(), json!({"content": []}));
    }

    #[tokio::test]
    async fn test_send_command_fans_out() {
        let (state, app) = app(60);
        let mut conn = state.hub.connect("c1");
        let command = json!({"id": "c9", "tool": "unknown_tool"});

        let response = app
            .oneshot(post_json("/test/send_command/c1", &command))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"status": "command sent"}));
        assert_eq!(conn.recv().await.unwrap(), command);
    }

    #[tokio::test]
    async fn command_waits_for_matching_result() {
        let (state, app) = app(5);
        let mut conn = state.hub.connect("c1");

        let pending = tokio::spawn(app.clone().oneshot(post_json(
            "/command/c1",
            &json!({"tool": "browser_navigate", "params": {"url": "https://example.com"}}),
        )));

        let sent = conn.recv().await.unwrap();
        assert_eq!(sent["tool"], "browser_navigate");
        assert_eq!(sent["params"]["url"], "https://example.com");
        let id = sent["id"].as_str().unwrap().to_string();

        app.oneshot(post_json(
            "/result/c1",
            &json!({"commandId": id, "result": {"ok": true}}),
        ))
        .await
        .unwrap();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"commandId": id, "result": {"ok": true}})
        );
    }

    #[tokio::test]
    async fn command_defaults_params_to_empty_object() {
        let (state, app) = app(1);
        let mut conn = state.hub.connect("c1");
        let pending = tokio::spawn(app.oneshot(post_json("/command/c1", &json!({"tool": "browser_close"}))));
        assert_eq!(conn.recv().await.unwrap()["params"], json!({}));
        pending.abort();
    }

    #[tokio::test]
    async fn command_times_out_without_result() {
        let (state, app) = app(1);
        let _conn = state.hub.connect("c1");

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            app.oneshot(post_json("/command/c1", &json!({"tool": "browser_close"}))),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn command_to_unknown_client_is_not_found() {
        let (_, app) = app(1);
        let response = app
            .oneshot(post_json("/command/nobody", &json!({"tool": "browser_close"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "CLIENT_NOT_CONNECTED");
    }
}
