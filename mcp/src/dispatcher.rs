//! Command dispatch.
//!
//! The stream listener publishes decoded [`Command`]s on an unbounded
//! channel. [`Dispatcher::run`] drains it and handles every command in its
//! own task, so a slow tool never holds up the stream or other commands.
//!
//! ## Tool resolution
//!
//! 1. Exact registry name.
//! 2. Otherwise the first tool whose name contains [`FALLBACK_MARKER`] and
//!    one of [`FALLBACK_KEYWORDS`]. This rescues near-miss browser tool
//!    names only.
//!
//! Unresolved commands and failed invocations are logged and dropped; only
//! a successful invocation produces a [`CommandResult`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::client::ResultSink;
use crate::mcp::ToolProvider;
use crate::tools::{Tool, ToolRegistry};

pub const FALLBACK_MARKER: &str = "playwright";
pub const FALLBACK_KEYWORDS: &[&str] = &["navigate", "browser"];

/// A request to invoke a named tool, as delivered by a `command` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Command {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

/// Output of a successful invocation, keyed by the originating command id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: String,
    pub result: Value,
}

/// What happened to a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reported,
    ToolNotFound,
    InvocationFailed,
}

/// Resolve the tool a command asks for.
pub fn resolve<'a>(registry: &'a ToolRegistry, requested: &str) -> Option<&'a Tool> {
    registry.get(requested).or_else(|| {
        registry.iter().find(|tool| {
            tool.name.contains(FALLBACK_MARKER)
                && FALLBACK_KEYWORDS.iter().any(|kw| tool.name.contains(kw))
        })
    })
}

/// Resolves, invokes and reports commands against one registry snapshot.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn ToolProvider>,
    sink: Arc<dyn ResultSink>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn ToolProvider>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            registry,
            provider,
            sink,
        }
    }

    /// Consume commands until every sender is dropped.
    ///
    /// Handler tasks are detached: they finish on their own even after the
    /// channel closes.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle(command).await;
            });
        }
    }

    /// Resolve, invoke and report one command.
    pub async fn handle(&self, command: Command) -> Outcome {
        let Some(tool) = resolve(&self.registry, &command.tool) else {
            error!(
                "Tool {} not found. Available tools: {:?}",
                command.tool,
                self.registry.names()
            );
            return Outcome::ToolNotFound;
        };

        let params = match command.params {
            Value::Null => Value::Object(serde_json::Map::new()),
            params => params,
        };
        info!(
            "Command {}: invoking {} with params {}",
            command.id, tool.name, params
        );

        match self.provider.call_tool(&tool.remote_name, params).await {
            Ok(result) => {
                info!("Command {}: {} completed", command.id, tool.name);
                self.sink
                    .report(CommandResult {
                        command_id: command.id,
                        result,
                    })
                    .await;
                Outcome::Reported
            }
            Err(e) => {
                error!("Command {}: {} failed: {}", command.id, tool.name, e);
                Outcome::InvocationFailed
            }
        }
    }
}
