//! Fan discovery out over every declared server and collect one result.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::enumerator::{EnumerateOptions, ServerOutcome, enumerate_server};
use super::locator::find_mcp_configs;
use super::{DiscoveredConfig, DiscoveryResult, ServerConfig};
use crate::events::DiscoveryEvent;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct DiscoveryOptions {
    pub enumerate: EnumerateOptions,
    /// Servers enumerated at the same time.
    pub max_concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            enumerate: EnumerateOptions::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Locate configs under `root` and enumerate every server they declare.
pub async fn discover_mcp_tools(root: &Path, options: &DiscoveryOptions) -> DiscoveryResult {
    let root_owned = root.to_path_buf();
    let reporter = options.enumerate.reporter.clone();
    let configs =
        match tokio::task::spawn_blocking(move || find_mcp_configs(&root_owned, reporter.as_ref()))
            .await
        {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!("config scan of {} failed: {}", root.display(), e);
                Vec::new()
            }
        };
    discover_from_configs(configs, options).await
}

/// Enumerate every server in already-located configs.
///
/// Results keep declaration order across files and within each file. A
/// task that panics contributes its server's wildcard.
pub async fn discover_from_configs(
    configs: Vec<DiscoveredConfig>,
    options: &DiscoveryOptions,
) -> DiscoveryResult {
    let jobs: Vec<(String, ServerConfig)> = configs
        .iter()
        .flat_map(|c| {
            c.config
                .servers
                .iter()
                .map(|(name, server)| (name.clone(), server.clone()))
        })
        .collect();

    let limit = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let mut set = JoinSet::new();
    let mut task_index = HashMap::new();
    for (idx, (name, server)) in jobs.iter().cloned().enumerate() {
        let limit = limit.clone();
        let opts = options.enumerate.clone();
        let handle = set.spawn(async move {
            // the semaphore is never closed
            let _permit = limit.acquire_owned().await.ok();
            (idx, enumerate_server(&name, &server, &opts).await)
        });
        task_index.insert(handle.id(), idx);
    }

    let mut slots: Vec<Option<ServerOutcome>> = (0..jobs.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(e) => {
                let Some(&idx) = task_index.get(&e.id()) else {
                    tracing::warn!("untracked discovery task failed: {}", e);
                    continue;
                };
                let server = &jobs[idx].0;
                let reason = format!("discovery task failed: {e}");
                options
                    .enumerate
                    .reporter
                    .report(DiscoveryEvent::WildcardFallback {
                        server: server.clone(),
                        reason: reason.clone(),
                    });
                slots[idx] = Some(ServerOutcome::wildcard(server, reason));
            }
        }
    }

    let tools = slots
        .into_iter()
        .zip(&jobs)
        .flat_map(|(slot, (name, _))| {
            slot.unwrap_or_else(|| ServerOutcome::wildcard(name, "discovery task did not finish"))
                .tools
        })
        .collect();
    DiscoveryResult::new(tools, configs)
}
