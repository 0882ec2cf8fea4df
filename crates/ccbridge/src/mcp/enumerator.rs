//! Per-server tool enumeration.
//!
//! Walks the negotiated transport ladder under one deadline. The first rung
//! that lists tools wins; construction or connection failures move on to the
//! next rung. Exhausting the ladder, or running out of time, degrades to the
//! server's wildcard permission. Sessions are always closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::negotiate::{TransportKind, TransportPlan, plan_transports};
use super::transport::{SdkTransportFactory, ToolSession, TransportFactory};
use super::{ServerConfig, ToolInfo};
use crate::events::{AttemptStage, DiscoveryEvent, DiscoveryReporter, TracingReporter};

pub const DEFAULT_ENUM_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a session gets to shut down before it is abandoned.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Close budget once the enumeration deadline has passed. A server never
/// runs longer than its timeout plus this.
pub const CLOSE_FLOOR: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct EnumerateOptions {
    /// Deadline for the whole ladder, measured from the first attempt.
    pub timeout: Duration,
    pub factory: Arc<dyn TransportFactory>,
    pub reporter: Arc<dyn DiscoveryReporter>,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ENUM_TIMEOUT,
            factory: Arc::new(SdkTransportFactory {
                request_timeout: DEFAULT_ENUM_TIMEOUT,
            }),
            reporter: Arc::new(TracingReporter),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationStatus {
    Listed { transport: TransportKind },
    Wildcard { reason: String },
}

/// What one server contributed to discovery.
#[derive(Debug, Clone)]
pub struct ServerOutcome {
    pub server: String,
    pub tools: Vec<ToolInfo>,
    pub status: EnumerationStatus,
}

impl ServerOutcome {
    pub fn wildcard(server: &str, reason: impl Into<String>) -> Self {
        Self {
            server: server.to_string(),
            tools: vec![ToolInfo::wildcard(server)],
            status: EnumerationStatus::Wildcard {
                reason: reason.into(),
            },
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.status, EnumerationStatus::Wildcard { .. })
    }
}

fn fallback(server: &str, reason: String, reporter: &dyn DiscoveryReporter) -> ServerOutcome {
    reporter.report(DiscoveryEvent::WildcardFallback {
        server: server.to_string(),
        reason: reason.clone(),
    });
    ServerOutcome::wildcard(server, reason)
}

async fn close_session(session: &mut dyn ToolSession, deadline: Instant) {
    let now = Instant::now();
    let close_by = deadline.max(now + CLOSE_FLOOR).min(now + CLOSE_GRACE);
    if tokio::time::timeout_at(close_by, session.close()).await.is_err() {
        tracing::debug!("session close exceeded grace period; abandoning");
    }
}

/// Enumerate one server's tools. Never fails.
pub async fn enumerate_server(
    server: &str,
    config: &ServerConfig,
    options: &EnumerateOptions,
) -> ServerOutcome {
    let reporter = options.reporter.as_ref();
    reporter.report(DiscoveryEvent::ServerStarted {
        server: server.to_string(),
    });
    let deadline = Instant::now() + options.timeout;

    let attempts = match plan_transports(config) {
        TransportPlan::Attempts(attempts) => attempts,
        TransportPlan::Wildcard { reason } => return fallback(server, reason, reporter),
    };
    let timed_out = || format!("timed out after {}ms", options.timeout.as_millis());

    let mut last_error = String::from("no transport attempted");
    for target in &attempts {
        let transport = target.kind();
        reporter.report(DiscoveryEvent::AttemptStarted {
            server: server.to_string(),
            transport,
        });

        let mut session = match options.factory.build(server, target) {
            Ok(session) => session,
            Err(e) => {
                last_error = format!("{transport}: {e}");
                reporter.report(DiscoveryEvent::AttemptFailed {
                    server: server.to_string(),
                    transport,
                    stage: AttemptStage::Construct,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let listed = tokio::time::timeout_at(deadline, session.open_and_list()).await;
        close_session(session.as_mut(), deadline).await;

        match listed {
            Ok(Ok(names)) => {
                reporter.report(DiscoveryEvent::ToolsListed {
                    server: server.to_string(),
                    transport,
                    count: names.len(),
                });
                return ServerOutcome {
                    server: server.to_string(),
                    tools: names.iter().map(|n| ToolInfo::new(server, n)).collect(),
                    status: EnumerationStatus::Listed { transport },
                };
            }
            Ok(Err(e)) => {
                last_error = format!("{transport}: {e}");
                reporter.report(DiscoveryEvent::AttemptFailed {
                    server: server.to_string(),
                    transport,
                    stage: AttemptStage::Connect,
                    error: e.to_string(),
                });
            }
            Err(_) => return fallback(server, timed_out(), reporter),
        }

        if Instant::now() >= deadline {
            return fallback(server, timed_out(), reporter);
        }
    }

    fallback(
        server,
        format!("all transports failed; last error: {last_error}"),
        reporter,
    )
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scriptable factory used by enumerator and aggregator tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::mcp::negotiate::{TransportKind, TransportTarget};
    use crate::mcp::transport::{ToolSession, TransportError, TransportFactory};

    #[derive(Debug, Clone)]
    pub enum Behaviour {
        FailBuild,
        FailConnect,
        Tools(Vec<&'static str>),
        Hang,
        /// Hangs while listing and again while closing.
        HangAndStall,
        Panic,
    }

    struct FakeSession {
        behaviour: Behaviour,
        closed: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolSession for FakeSession {
        async fn open_and_list(&mut self) -> Result<Vec<String>, TransportError> {
            match &self.behaviour {
                Behaviour::Tools(names) => Ok(names.iter().map(|s| s.to_string()).collect()),
                Behaviour::FailConnect => Err(TransportError::Connect("refused".into())),
                Behaviour::Hang | Behaviour::HangAndStall => std::future::pending().await,
                Behaviour::Panic => panic!("session exploded"),
                Behaviour::FailBuild => unreachable!("never built"),
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if matches!(self.behaviour, Behaviour::HangAndStall) {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Behaviour keyed by (server, transport); unlisted pairs fail to build.
    #[derive(Default)]
    pub struct FakeFactory {
        pub script: HashMap<(String, TransportKind), Behaviour>,
        pub attempts: Mutex<Vec<(String, TransportTarget)>>,
        pub closed: std::sync::Arc<AtomicUsize>,
    }

    impl FakeFactory {
        pub fn with(mut self, server: &str, kind: TransportKind, behaviour: Behaviour) -> Self {
            self.script.insert((server.to_string(), kind), behaviour);
            self
        }

        pub fn attempts(&self) -> Vec<(String, TransportTarget)> {
            self.attempts.lock().unwrap().clone()
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl TransportFactory for FakeFactory {
        fn build(
            &self,
            server: &str,
            target: &TransportTarget,
        ) -> Result<Box<dyn ToolSession>, TransportError> {
            self.attempts
                .lock()
                .unwrap()
                .push((server.to_string(), target.clone()));
            let behaviour = self
                .script
                .get(&(server.to_string(), target.kind()))
                .cloned()
                .unwrap_or(Behaviour::FailBuild);
            if matches!(behaviour, Behaviour::FailBuild) {
                return Err(TransportError::Construct("scripted failure".into()));
            }
            Ok(Box::new(FakeSession {
                behaviour,
                closed: self.closed.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{Behaviour, FakeFactory};
    use super::*;
    use crate::events::RecordingReporter;
    use crate::mcp::NetworkKind;
    use crate::mcp::negotiate::TransportTarget;
    use std::collections::HashMap;

    fn options(factory: Arc<FakeFactory>, reporter: Arc<RecordingReporter>) -> EnumerateOptions {
        EnumerateOptions {
            timeout: Duration::from_secs(5),
            factory,
            reporter,
        }
    }

    fn local(command: &str) -> ServerConfig {
        ServerConfig::Local {
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    fn names(outcome: &ServerOutcome) -> Vec<String> {
        outcome.tools.iter().map(|t| t.full_tool_name.clone()).collect()
    }

    #[tokio::test]
    async fn lists_tools_over_stdio() {
        let factory = Arc::new(FakeFactory::default().with(
            "x",
            TransportKind::Stdio,
            Behaviour::Tools(vec!["read", "write"]),
        ));
        let reporter = Arc::new(RecordingReporter::default());
        let outcome = enumerate_server("x", &local("my-tool"), &options(factory.clone(), reporter)).await;
        assert_eq!(names(&outcome), vec!["mcp__x__read", "mcp__x__write"]);
        assert_eq!(
            outcome.status,
            EnumerationStatus::Listed {
                transport: TransportKind::Stdio
            }
        );
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn zero_tools_is_not_a_failure() {
        let factory = Arc::new(FakeFactory::default().with(
            "empty",
            TransportKind::Stdio,
            Behaviour::Tools(vec![]),
        ));
        let outcome = enumerate_server(
            "empty",
            &local("srv"),
            &options(factory, Arc::new(RecordingReporter::default())),
        )
        .await;
        assert!(outcome.tools.is_empty());
        assert!(!outcome.is_wildcard());
    }

    #[tokio::test]
    async fn unusable_server_gets_wildcard_without_attempts() {
        let factory = Arc::new(FakeFactory::default());
        let reporter = Arc::new(RecordingReporter::default());
        let outcome = enumerate_server(
            "broken",
            &ServerConfig::Unusable {
                reason: "no command".into(),
            },
            &options(factory.clone(), reporter.clone()),
        )
        .await;
        assert_eq!(outcome.tools, vec![ToolInfo::wildcard("broken")]);
        assert_eq!(outcome.tools[0].full_tool_name, "mcp__broken__*");
        assert!(factory.attempts().is_empty());
        assert!(
            reporter
                .events()
                .iter()
                .any(|e| matches!(e, DiscoveryEvent::WildcardFallback { .. }))
        );
    }

    #[tokio::test]
    async fn websocket_construction_failure_falls_back_to_http() {
        let factory = Arc::new(FakeFactory::default().with(
            "remote",
            TransportKind::StreamableHttp,
            Behaviour::Tools(vec!["search"]),
        ));
        let config = ServerConfig::Network {
            kind: NetworkKind::WebSocket,
            url: "http://h:1/".into(),
        };
        let outcome = enumerate_server(
            "remote",
            &config,
            &options(factory.clone(), Arc::new(RecordingReporter::default())),
        )
        .await;

        let attempts: Vec<_> = factory.attempts().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            attempts,
            vec![
                TransportTarget::WebSocket {
                    url: "ws://h:1/".into()
                },
                TransportTarget::StreamableHttp {
                    url: "http://h:1/".into()
                },
            ]
        );
        assert_eq!(names(&outcome), vec!["mcp__remote__search"]);
    }

    #[tokio::test]
    async fn connect_failure_moves_to_next_rung() {
        let factory = Arc::new(
            FakeFactory::default()
                .with("r", TransportKind::StreamableHttp, Behaviour::FailConnect)
                .with("r", TransportKind::Sse, Behaviour::Tools(vec!["a"])),
        );
        let reporter = Arc::new(RecordingReporter::default());
        let config = ServerConfig::Network {
            kind: NetworkKind::StreamableHttp,
            url: "https://h/mcp".into(),
        };
        let outcome = enumerate_server("r", &config, &options(factory.clone(), reporter.clone())).await;
        assert_eq!(
            outcome.status,
            EnumerationStatus::Listed {
                transport: TransportKind::Sse
            }
        );
        // the failed HTTP session was closed too
        assert_eq!(factory.closed(), 2);
        assert!(reporter.events().iter().any(|e| matches!(
            e,
            DiscoveryEvent::AttemptFailed {
                stage: AttemptStage::Connect,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn exhausted_ladder_degrades_to_wildcard() {
        let factory = Arc::new(
            FakeFactory::default()
                .with("r", TransportKind::Sse, Behaviour::FailConnect),
        );
        let config = ServerConfig::Network {
            kind: NetworkKind::Sse,
            url: "https://h/sse".into(),
        };
        let outcome = enumerate_server(
            "r",
            &config,
            &options(factory.clone(), Arc::new(RecordingReporter::default())),
        )
        .await;
        assert!(outcome.is_wildcard());
        assert_eq!(names(&outcome), vec!["mcp__r__*"]);
        assert_eq!(factory.attempts().len(), 2);
    }

    #[tokio::test]
    async fn timeout_degrades_to_wildcard_and_closes() {
        let factory = Arc::new(FakeFactory::default().with("slow", TransportKind::Stdio, Behaviour::Hang));
        let opts = EnumerateOptions {
            timeout: Duration::from_millis(50),
            factory: factory.clone(),
            reporter: Arc::new(RecordingReporter::default()),
        };
        let outcome = enumerate_server("slow", &local("slow"), &opts).await;
        assert!(outcome.is_wildcard());
        match &outcome.status {
            EnumerationStatus::Wildcard { reason } => assert!(reason.contains("timed out")),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn stalled_close_stays_near_the_deadline() {
        let factory = Arc::new(FakeFactory::default().with(
            "stuck",
            TransportKind::Stdio,
            Behaviour::HangAndStall,
        ));
        let opts = EnumerateOptions {
            timeout: Duration::from_millis(50),
            factory: factory.clone(),
            reporter: Arc::new(RecordingReporter::default()),
        };
        let started = std::time::Instant::now();
        let outcome = enumerate_server("stuck", &local("stuck"), &opts).await;
        let elapsed = started.elapsed();

        assert!(outcome.is_wildcard());
        assert_eq!(factory.closed(), 1);
        assert!(elapsed < CLOSE_GRACE, "took {elapsed:?}");
        assert!(elapsed >= opts.timeout);
    }
}
