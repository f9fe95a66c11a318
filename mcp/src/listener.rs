//! SSE stream listener.
//!
//! [`StreamListener::listen`] runs one connection's lifetime:
//!
//! ```text
//! Connecting ──open──▶ Open ──error / end of stream──▶ Closed
//! ```
//!
//! While open, `command` events are decoded and published on the
//! dispatcher channel without waiting for them to run. `heartbeat` and
//! untyped messages are only logged. Reconnecting is the caller's job
//! (see [`crate::bridge`]).

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, RemoteClient};
use crate::dispatcher::Command;
use crate::sse::{SseDecoder, SseEvent};

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

/// Why a connection ended.
#[derive(Debug)]
pub enum StreamError {
    /// The stream could not be opened.
    Connect(ClientError),
    /// The body failed mid-stream.
    Transport(reqwest::Error),
    /// The server ended the stream.
    Ended,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Connect(e) => write!(f, "connect failed: {e}"),
            StreamError::Transport(e) => write!(f, "stream interrupted: {e}"),
            StreamError::Ended => write!(f, "stream closed by server"),
        }
    }
}

impl std::error::Error for StreamError {}

pub struct StreamListener {
    client: Arc<RemoteClient>,
    state: StreamState,
}

impl StreamListener {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            state: StreamState::Closed,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Open the stream and pump events until it fails or ends.
    ///
    /// `on_open` runs once, right after the server accepted the stream.
    /// Always returns the reason the connection is gone.
    pub async fn listen<F>(
        &mut self,
        commands: &mpsc::UnboundedSender<Command>,
        on_open: F,
    ) -> StreamError
    where
        F: FnOnce(),
    {
        self.transition(StreamState::Connecting);
        info!("Connecting to {}", self.client.connect_url());

        let response = match self.client.open_stream().await {
            Ok(resp) => resp,
            Err(e) => {
                self.transition(StreamState::Closed);
                return StreamError::Connect(e);
            }
        };

        self.transition(StreamState::Open);
        info!("SSE connection established");
        on_open();

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        let reason = loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for event in decoder.feed(&chunk) {
                        handle_event(event, commands);
                    }
                }
                Some(Err(e)) => break StreamError::Transport(e),
                None => break StreamError::Ended,
            }
        };

        self.transition(StreamState::Closed);
        reason
    }

    fn transition(&mut self, next: StreamState) {
        debug!("Stream state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Route one decoded event. Returns `true` if a command was published.
fn handle_event(event: SseEvent, commands: &mpsc::UnboundedSender<Command>) -> bool {
    match event.event.as_str() {
        "command" => match serde_json::from_str::<Command>(&event.data) {
            Ok(command) => {
                info!(
                    "Command event received: id={} tool={}",
                    command.id, command.tool
                );
                if commands.send(command).is_err() {
                    warn!("Dispatcher is gone, dropping command");
                    return false;
                }
                true
            }
            Err(e) => {
                error!("Error decoding command event: {e} (data: {})", event.data);
                false
            }
        },
        "heartbeat" => {
            info!("Heartbeat received: {}", event.data);
            false
        }
        "message" => {
            info!("Message received: {}", event.data);
            false
        }
        other => {
            debug!(
                "Ignoring '{other}' event (id {:?}): {}",
                event.id, event.data
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Duration;

    use axum::response::sse::{Event, Sse};
    use axum::routing::get;
    use axum::Router;
    use futures_util::stream;
    use serde_json::json;

    fn sse_event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: name.into(),
            data: data.into(),
            id: None,
        }
    }

    #[test]
    fn only_command_events_reach_the_dispatcher() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!handle_event(sse_event("heartbeat", "ping"), &tx));
        assert!(!handle_event(sse_event("message", "hello"), &tx));
        assert!(!handle_event(sse_event("status", "{}"), &tx));
        assert!(!handle_event(sse_event("command", "not json"), &tx));
        assert!(rx.try_recv().is_err());

        let data = json!({"id": "c1", "tool": "playwright_navigate", "params": {"url": "https://example.com"}});
        assert!(handle_event(sse_event("command", &data.to_string()), &tx));
        let cmd = rx.try_recv().unwrap();
        assert_eq!(cmd.id, "c1");
        assert_eq!(cmd.params["url"], "https://example.com");
    }

    #[test]
    fn closed_dispatcher_drops_command() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let data = json!({"id": "c1", "tool": "t"}).to_string();
        assert!(!handle_event(sse_event("command", &data), &tx));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn listen_publishes_commands_until_stream_ends() {
        let router = Router::new().route(
            "/connect/{client_id}",
            get(|| async {
                let events = vec![
                    Event::default().event("heartbeat").data("ping"),
                    Event::default()
                        .event("command")
                        .data(r#"{"id":"c1","tool":"playwright_navigate","params":{"url":"https://example.com"}}"#),
                    Event::default().data("untyped"),
                    Event::default()
                        .event("command")
                        .data(r#"{"id":"c2","tool":"unknown_tool"}"#),
                ];
                Sse::new(stream::iter(events.into_iter().map(Ok::<_, Infallible>)))
            }),
        );
        let base = serve(router).await;

        let client = Arc::new(RemoteClient::new(&base, "test-client-1").unwrap());
        let mut listener = StreamListener::new(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut opened = 0;

        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            listener.listen(&tx, || opened += 1),
        )
        .await
        .unwrap();

        assert!(matches!(reason, StreamError::Ended));
        assert_eq!(opened, 1);
        assert_eq!(listener.state(), StreamState::Closed);
        assert_eq!(rx.try_recv().unwrap().id, "c1");
        assert_eq!(rx.try_recv().unwrap().id, "c2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_connection_skips_on_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Arc::new(RemoteClient::new(&format!("http://{addr}"), "x").unwrap());
        let mut stream_listener = StreamListener::new(client);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut opened = false;

        let reason = stream_listener.listen(&tx, || opened = true).await;
        assert!(matches!(reason, StreamError::Connect(_)));
        assert!(!opened);
        assert_eq!(stream_listener.state(), StreamState::Closed);
    }
}
