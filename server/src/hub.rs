//! Connection hub: per-client command queues, pending results, announced tools.
//!
//! Every `GET /connect/{client_id}` registers one queue under the client id.
//! A client may hold several live streams at once; commands fan out to all of
//! them. The returned [`Connection`] owns the receiving end and unregisters
//! its queue when dropped, which happens when axum drops the SSE body.
//!
//! Results are matched to waiters by command id through a map of `oneshot`
//! senders, the same way the relay matches tunnel responses to requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};

type Queues = HashMap<String, HashMap<u64, mpsc::UnboundedSender<Value>>>;

/// Shared hub state. Cheap to clone.
#[derive(Clone, Default)]
pub struct Hub {
    /// Live queues keyed by client id, then connection id. Guarded by a
    /// blocking mutex so [`Connection`] can unregister from `Drop`; never held
    /// across an `.await`.
    queues: Arc<Mutex<Queues>>,
    /// Waiters for command results, keyed by command id.
    pending: Arc<tokio::sync::Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    /// Last tool list announced by each client.
    tools: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    next_connection: Arc<AtomicU64>,
}

/// One live stream's receiving end.
pub struct Connection {
    pub id: u64,
    pub client_id: String,
    rx: mpsc::UnboundedReceiver<Value>,
    queues: Arc<Mutex<Queues>>,
}

impl Connection {
    /// Next queued command, or `None` once the hub dropped the queue.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conns) = queues.get_mut(&self.client_id) {
            conns.remove(&self.id);
            if conns.is_empty() {
                queues.remove(&self.client_id);
            }
        }
        info!(
            "Client {} disconnected (connection {})",
            self.client_id, self.id
        );
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new queue for `client_id`.
    pub fn connect(&self, client_id: &str) -> Connection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_queues()
            .entry(client_id.to_string())
            .or_default()
            .insert(id, tx);
        info!("Client {client_id} connected (connection {id})");
        Connection {
            id,
            client_id: client_id.to_string(),
            rx,
            queues: Arc::clone(&self.queues),
        }
    }

    /// Queue `command` on every live stream of `client_id`.
    /// Returns how many streams accepted it.
    pub fn send(&self, client_id: &str, command: &Value) -> usize {
        let mut queues = self.lock_queues();
        let Some(conns) = queues.get_mut(client_id) else {
            return 0;
        };
        conns.retain(|_, tx| tx.send(command.clone()).is_ok());
        let delivered = conns.len();
        if conns.is_empty() {
            queues.remove(client_id);
        }
        delivered
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lock_queues().contains_key(client_id)
    }

    /// Number of distinct client ids with at least one live stream.
    pub fn connected_clients(&self) -> usize {
        self.lock_queues().len()
    }

    /// Drop every queue so all live streams end.
    pub fn close_all(&self) {
        let mut queues = self.lock_queues();
        let streams: usize = queues.values().map(HashMap::len).sum();
        queues.clear();
        info!("Closed {streams} client streams");
    }

    /// Register a waiter for the result of `command_id`.
    pub async fn expect_result(&self, command_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(command_id.to_string(), tx);
        rx
    }

    /// Hand a result to its waiter. Returns `false` if nobody was waiting.
    pub async fn complete(&self, command_id: &str, result: Value) -> bool {
        let Some(tx) = self.pending.lock().await.remove(command_id) else {
            debug!("No waiter for command {command_id}");
            return false;
        };
        tx.send(result).is_ok()
    }

    /// Drop the waiter for `command_id`, if any.
    pub async fn cancel(&self, command_id: &str) {
        self.pending.lock().await.remove(command_id);
    }

    pub async fn register_tools(&self, client_id: &str, tools: Vec<Value>) {
        self.tools.write().await.insert(client_id.to_string(), tools);
    }

    pub async fn tools(&self, client_id: &str) -> Option<Vec<Value>> {
        self.tools.read().await.get(client_id).cloned()
    }
}
