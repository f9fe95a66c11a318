//! Connection lifecycle: registry fetch, stream, reconnect.
//!
//! One cycle of [`Bridge::run`]:
//!
//! 1. Fetch a registry snapshot from the provider (or keep the previous one
//!    when `refetch_tools_on_reconnect = false`). A fetch failure is fatal.
//! 2. Publish the definitions to the local listing.
//! 3. Start a [`Dispatcher`] on a fresh command channel.
//! 4. Listen on the stream; on open, announce the tools once.
//! 5. When the stream goes away, close the channel, sleep the fixed delay,
//!    and start over.
//!
//! Command handlers from a previous cycle are never cancelled.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::client::{RemoteClient, ResultSink};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::listener::{StreamError, StreamListener, StreamState};
use crate::listing::ToolListing;
use crate::mcp::{ProviderError, ToolProvider};
use crate::tools::ToolRegistry;

pub struct Bridge {
    config: Arc<Config>,
    provider: Arc<dyn ToolProvider>,
    client: Arc<RemoteClient>,
    sink: Arc<dyn ResultSink>,
    listing: Option<ToolListing>,
}

impl Bridge {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn ToolProvider>,
        client: Arc<RemoteClient>,
        sink: Arc<dyn ResultSink>,
        listing: Option<ToolListing>,
    ) -> Self {
        Self {
            config,
            provider,
            client,
            sink,
            listing,
        }
    }

    /// Run connection cycles forever. Returns only when the provider fails.
    pub async fn run(self) -> Result<(), ProviderError> {
        let mut listener = StreamListener::new(Arc::clone(&self.client));
        let mut snapshot: Option<Arc<ToolRegistry>> = None;
        let delay = self.config.remote.reconnect_delay();

        loop {
            let registry = match snapshot.take() {
                Some(registry) if !self.config.remote.refetch_tools_on_reconnect => registry,
                _ => Arc::new(self.fetch_registry().await?),
            };
            if let Some(listing) = &self.listing {
                listing.publish(registry.definitions()).await;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let dispatcher = Dispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&self.provider),
                Arc::clone(&self.sink),
            );
            tokio::spawn(dispatcher.run(rx));

            let reason = listener.listen(&tx, || self.announce(&registry)).await;
            drop(tx);
            debug_assert_eq!(listener.state(), StreamState::Closed);
            match reason {
                StreamError::Ended => warn!("SSE stream closed by server"),
                e => error!("SSE connection error: {e}"),
            }

            info!("Attempting to reconnect in {}s...", delay.as_secs());
            tokio::time::sleep(delay).await;
            snapshot = Some(registry);
        }
    }

    async fn fetch_registry(&self) -> Result<ToolRegistry, ProviderError> {
        let prefix = self.config.provider.tool_name_prefix();
        let registry = ToolRegistry::fetch(self.provider.as_ref(), prefix.as_deref()).await?;
        info!("Available tools: {:?}", registry.names());
        if registry.is_empty() {
            warn!("Provider exposes no tools; every command will be dropped");
        }
        Ok(registry)
    }

    /// Best-effort tool announcement, detached from the stream.
    fn announce(&self, registry: &ToolRegistry) {
        if !self.config.remote.announce_tools {
            return;
        }
        let client = Arc::clone(&self.client);
        let tools = registry.definitions();
        tokio::spawn(async move {
            match client.register_tools(&tools).await {
                Ok(body) => info!("Registered {} tools: {}", tools.len(), body),
                Err(e) => warn!("Tool registration failed: {e}"),
            }
        });
    }
}
