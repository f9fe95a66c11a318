//! Server-Sent Events command stream.
//!
//! `GET /connect/{client_id}` registers a queue in the [`crate::hub::Hub`] and
//! streams it back:
//!
//! - each queued command becomes a `command` event whose data is the JSON
//!   command `{id, tool, params}`;
//! - after `heartbeat_interval_secs` with nothing queued, a `heartbeat` event
//!   with data `ping` is sent instead.
//!
//! The queue is unregistered when the client goes away and axum drops the
//! response body.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;

use crate::AppState;

/// `GET /connect/{client_id}` — SSE command stream.
pub async fn connect(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    let connection = state.hub.connect(&client_id);
    let heartbeat = state.config.server.heartbeat_interval();

    let stream = futures::stream::unfold(connection, move |mut connection| async move {
        match tokio::time::timeout(heartbeat, connection.recv()).await {
            Ok(Some(command)) => {
                let data = serde_json::to_string(&command).unwrap_or_default();
                let event = Event::default().event("command").data(data);
                Some((Ok::<_, Infallible>(event), connection))
            }
            Ok(None) => None,
            Err(_) => {
                let event = Event::default().event("heartbeat").data("ping");
                Some((Ok(event), connection))
            }
        }
    });

    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::{router, AppState, Config};

    fn state(heartbeat_secs: u64) -> AppState {
        let mut config = Config::default();
        config.server.heartbeat_interval_secs = heartbeat_secs;
        AppState::new(config)
    }

    fn connect_request(client_id: &str) -> Request<Body> {
        Request::get(format!("/connect/{client_id}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn next_frame(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn queued_commands_become_command_events() {
        let state = state(15);
        let response = router(state.clone())
            .oneshot(connect_request("c1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        assert!(state.hub.is_connected("c1"));

        let command = json!({"id": "c1", "tool": "playwright_navigate", "params": {"url": "https://example.com"}});
        assert_eq!(state.hub.send("c1", &command), 1);

        let mut body = response.into_body().into_data_stream();
        let frame = next_frame(&mut body).await;
        assert!(frame.starts_with("event: command\n"));
        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(data).unwrap(), command);
    }

    #[tokio::test]
    async fn idle_stream_sends_heartbeat() {
        let state = state(1);
        let response = router(state).oneshot(connect_request("c1")).await.unwrap();
        let mut body = response.into_body().into_data_stream();
        assert_eq!(next_frame(&mut body).await, "event: heartbeat\ndata: ping\n\n");
    }

    #[tokio::test]
    async fn dropping_the_stream_unregisters_the_client() {
        let state = state(15);
        let response = router(state.clone())
            .oneshot(connect_request("c1"))
            .await
            .unwrap();
        assert_eq!(state.hub.connected_clients(), 1);
        drop(response);
        assert_eq!(state.hub.connected_clients(), 0);
    }
}
