//! Facade tying the assistant client to the rest of the bridge.

use std::sync::Arc;

use crate::assistant::{AssistantClient, AssistantResponse, ClaudeCli, QueryOptions};

pub struct Bridge {
    client: Arc<dyn AssistantClient>,
    defaults: QueryOptions,
}

impl Bridge {
    pub fn new(client: Arc<dyn AssistantClient>, defaults: QueryOptions) -> Self {
        Self { client, defaults }
    }

    /// Bridge over the `claude` binary found at `binary`.
    pub fn claude(binary: &str, defaults: QueryOptions) -> Self {
        Self::new(Arc::new(ClaudeCli::new(binary, defaults.clone())), defaults)
    }

    /// Probe the assistant; logs when it cannot be used.
    pub async fn initialize(&self) -> bool {
        let ready = self.client.is_available().await;
        if ready {
            tracing::info!("assistant CLI available");
        } else {
            tracing::error!("assistant CLI not found; install it and make sure it is on PATH");
        }
        ready
    }

    pub async fn is_ready(&self) -> bool {
        self.client.is_available().await
    }

    pub async fn version(&self) -> Option<String> {
        self.client.version().await
    }

    pub async fn ask(
        &self,
        prompt: &str,
        session_id: &str,
        options: Option<&QueryOptions>,
    ) -> AssistantResponse {
        let merged = options
            .map(|o| o.merged_over(&self.defaults))
            .unwrap_or_else(|| self.defaults.clone());
        tracing::debug!("asking session {} ({} chars)", session_id, prompt.len());
        let response = self
            .client
            .query_with_session(prompt, session_id, &merged)
            .await;
        if response.success {
            tracing::info!(
                "session {} answered in {}ms",
                session_id,
                response.elapsed.as_millis()
            );
        } else {
            tracing::warn!(
                "session {} failed after {}ms: {}",
                session_id,
                response.elapsed.as_millis(),
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        response
    }
}
