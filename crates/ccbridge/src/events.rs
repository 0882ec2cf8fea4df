//! Structured discovery events and the reporters that consume them.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::mcp::negotiate::TransportKind;

/// Which step of a transport attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    /// The session could not be constructed (bad address, missing binary).
    Construct,
    /// The session was built but connecting or listing tools failed.
    Connect,
}

/// Something noteworthy that happened during discovery.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    ConfigFound {
        path: PathBuf,
        servers: usize,
    },
    ConfigSkipped {
        path: PathBuf,
        reason: String,
    },
    ServerStarted {
        server: String,
    },
    AttemptStarted {
        server: String,
        transport: TransportKind,
    },
    AttemptFailed {
        server: String,
        transport: TransportKind,
        stage: AttemptStage,
        error: String,
    },
    ToolsListed {
        server: String,
        transport: TransportKind,
        count: usize,
    },
    WildcardFallback {
        server: String,
        reason: String,
    },
}

/// Sink for discovery events.
pub trait DiscoveryReporter: Send + Sync {
    fn report(&self, event: DiscoveryEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl DiscoveryReporter for TracingReporter {
    fn report(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::ConfigFound { path, servers } => {
                tracing::info!(path = %path.display(), servers, "found MCP config");
            }
            DiscoveryEvent::ConfigSkipped { path, reason } => {
                tracing::warn!(path = %path.display(), %reason, "skipping MCP config");
            }
            DiscoveryEvent::ServerStarted { server } => {
                tracing::debug!(%server, "enumerating MCP server");
            }
            DiscoveryEvent::AttemptStarted { server, transport } => {
                tracing::debug!(%server, %transport, "trying transport");
            }
            DiscoveryEvent::AttemptFailed {
                server,
                transport,
                stage,
                error,
            } => {
                tracing::debug!(%server, %transport, ?stage, %error, "transport attempt failed");
            }
            DiscoveryEvent::ToolsListed {
                server,
                transport,
                count,
            } => {
                tracing::info!(%server, %transport, count, "listed MCP tools");
            }
            DiscoveryEvent::WildcardFallback { server, reason } => {
                tracing::warn!(%server, %reason, "falling back to wildcard permission");
            }
        }
    }
}

/// Collects events in memory, for tests and callers that want a transcript.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<DiscoveryEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<DiscoveryEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiscoveryReporter for RecordingReporter {
    fn report(&self, event: DiscoveryEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::default();
        reporter.report(DiscoveryEvent::ServerStarted { server: "a".into() });
        reporter.report(DiscoveryEvent::WildcardFallback {
            server: "a".into(),
            reason: "timeout".into(),
        });
        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DiscoveryEvent::ServerStarted { .. }));
        assert!(matches!(events[1], DiscoveryEvent::WildcardFallback { .. }));
    }
}
