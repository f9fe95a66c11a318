//! MCP (Model Context Protocol) client over stdio.
//!
//! Spawns the configured MCP server as a child process and talks
//! JSON-RPC 2.0 to it, one message per line on stdin/stdout.
//!
//! ## Methods used
//!
//! | Method                      | Direction | Purpose                         |
//! |-----------------------------|-----------|---------------------------------|
//! | `initialize`                | request   | Handshake, protocol negotiation |
//! | `notifications/initialized` | notify    | Completes the handshake         |
//! | `tools/list`                | request   | Tool registry fetch (paginated) |
//! | `tools/call`                | request   | Tool invocation                 |
//!
//! Requests initiated by the server are answered too: `ping` gets an empty
//! result, anything else gets `-32601`. Server notifications are logged and
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "mcp-toolrelay";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A tool as declared by the provider in `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Source of locally invocable tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Fetch every tool the provider exposes.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ProviderError>;

    /// Invoke a tool by its provider-side name. Returns the raw call result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError>;
}

/// Errors returned by [`McpClient`].
#[derive(Debug)]
pub enum ProviderError {
    /// The server process could not be started.
    Spawn(std::io::Error),
    /// The stdio pipes are gone (server exited or writer task stopped).
    Closed,
    /// No response within the configured timeout.
    Timeout { method: String, after: Duration },
    /// The server answered with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The response could not be interpreted.
    Protocol(String),
    /// `tools/call` succeeded at the transport level but flagged `isError`.
    ToolFailed(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Spawn(e) => write!(f, "failed to spawn MCP server: {e}"),
            ProviderError::Closed => write!(f, "MCP server connection closed"),
            ProviderError::Timeout { method, after } => {
                write!(f, "{method} timed out after {after:?}")
            }
            ProviderError::Rpc { code, message } => {
                write!(f, "MCP error {code}: {message}")
            }
            ProviderError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            ProviderError::ToolFailed(msg) => write!(f, "tool reported an error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Connected MCP client.
pub struct McpClient {
    writer_tx: mpsc::Sender<String>,
    pending: Pending,
    /// Set by the reader task once stdout is gone.
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    request_timeout: Duration,
    call_timeout: Duration,
    child: Mutex<Option<Child>>,
}

impl McpClient {
    /// Spawn the configured server and perform the `initialize` handshake.
    pub async fn spawn(config: &ProviderConfig) -> Result<Self, ProviderError> {
        info!(
            "Spawning MCP server '{}': {} {}",
            config.name,
            config.command,
            config.args.join(" ")
        );

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProviderError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ProviderError::Closed)?;
        let stdout = child.stdout.take().ok_or(ProviderError::Closed)?;
        if let Some(stderr) = child.stderr.take() {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        debug!("[{server}] {line}");
                    }
                }
            });
        }

        let client = Self::from_io(
            stdout,
            stdin,
            config.request_timeout(),
            config.call_timeout(),
        );
        *client.child.lock().await = Some(child);

        let init = client.initialize().await?;
        let server_info = init
            .get("serverInfo")
            .map(|v| v.to_string())
            .unwrap_or_default();
        info!("MCP server '{}' initialized: {}", config.name, server_info);
        Ok(client)
    }

    /// Build a client over an arbitrary byte stream pair.
    ///
    /// Spawns one task writing queued messages and one task routing
    /// responses to their waiting requests.
    pub fn from_io<R, W>(
        reader: R,
        writer: W,
        request_timeout: Duration,
        call_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);

        let mut writer = writer;
        tokio::spawn(async move {
            while let Some(mut line) = writer_rx.recv().await {
                line.push('\n');
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!("MCP stdin write error: {e}");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("MCP stdin flush error: {e}");
                    break;
                }
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let routing = Arc::clone(&pending);
        let reply_tx = writer_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_message(&routing, &reply_tx, line.trim()).await,
                    Ok(None) => {
                        info!("MCP server closed stdout");
                        break;
                    }
                    Err(e) => {
                        error!("MCP stdout read error: {e}");
                        break;
                    }
                }
            }
            // Flag first: a request inserted after the clear must still see it.
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every outstanding request with `Closed`.
            routing.lock().await.clear();
        });

        Self {
            writer_tx,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            request_timeout,
            call_timeout,
            child: Mutex::new(None),
        }
    }

    /// `initialize` + `notifications/initialized`. Returns the server's result.
    pub async fn initialize(&self) -> Result<Value, ProviderError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION
            }
        });
        let result = self
            .request("initialize", params, self.request_timeout)
            .await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(result)
    }

    /// Kill the server process, if this client owns one.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            info!("Stopping MCP server");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill MCP server: {e}");
            }
        }
        *guard = None;
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(ProviderError::Closed);
        }

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self.writer_tx.send(message.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ProviderError::Closed);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ProviderError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ProviderError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                });
            }
        };

        if let Some(err) = response.get("error") {
            return Err(ProviderError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ProviderError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.writer_tx
            .send(message.to_string())
            .await
            .map_err(|_| ProviderError::Closed)
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ProviderError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self
                .request("tools/list", params, self.request_timeout)
                .await?;
            let page: Vec<ToolSpec> =
                serde_json::from_value(result.get("tools").cloned().unwrap_or(json!([])))
                    .map_err(|e| ProviderError::Protocol(format!("invalid tools/list: {e}")))?;
            tools.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(String::from);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                self.call_timeout,
            )
            .await?;
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ProviderError::ToolFailed(text_content(&result)));
        }
        Ok(result)
    }
}

/// Route one line from the server: responses complete pending requests,
/// server requests get answered, notifications are logged.
async fn route_message(pending: &Pending, reply_tx: &mpsc::Sender<String>, line: &str) {
    if line.is_empty() {
        return;
    }
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring non-JSON line from MCP server: {e}");
            return;
        }
    };

    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id").filter(|id| !id.is_null());

    match (method, id) {
        (None, Some(id)) => {
            let Some(id) = id.as_u64() else {
                warn!("MCP response with unexpected id {id}");
                return;
            };
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => debug!("MCP response for unknown id={id}, ignoring"),
            }
        }
        (Some(method), Some(id)) => {
            let reply = if method == "ping" {
                json!({ "jsonrpc": "2.0", "id": id, "result": {} })
            } else {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("Method not found: {method}")
                    }
                })
            };
            let _ = reply_tx.send(reply.to_string()).await;
        }
        (Some(method), None) => debug!("MCP notification: {method}"),
        (None, None) => warn!("Ignoring MCP message without method or id"),
    }
}

/// Concatenate the `text` blocks of a `tools/call` result.
pub fn text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
