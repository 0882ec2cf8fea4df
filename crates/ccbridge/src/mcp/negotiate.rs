//! Transport planning: turn one server declaration into an ordered ladder of
//! attempts, or the wildcard signal.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use url::Url;

use super::{NetworkKind, ServerConfig};

/// Concrete transport tried during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::Sse => "sse",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of the ladder: a transport and the address it should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
    },
    Sse {
        url: String,
    },
    WebSocket {
        url: String,
    },
}

impl TransportTarget {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportTarget::Stdio { .. } => TransportKind::Stdio,
            TransportTarget::StreamableHttp { .. } => TransportKind::StreamableHttp,
            TransportTarget::Sse { .. } => TransportKind::Sse,
            TransportTarget::WebSocket { .. } => TransportKind::WebSocket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    /// Try these in order; the first that lists tools wins.
    Attempts(Vec<TransportTarget>),
    /// Nothing to try; grant the server's wildcard.
    Wildcard { reason: String },
}

/// Rewrite `http`/`https` to `ws`/`wss`, ignoring scheme case. Anything
/// else, including text that does not parse as a URL, passes through.
pub fn websocket_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let scheme = match parsed.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return url.to_string(),
    };
    if parsed.set_scheme(scheme).is_err() {
        return url.to_string();
    }
    parsed.into()
}

pub fn plan_transports(config: &ServerConfig) -> TransportPlan {
    match config {
        ServerConfig::Local { command, args, env } => {
            TransportPlan::Attempts(vec![TransportTarget::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            }])
        }
        ServerConfig::Network { kind, url } => {
            let http = TransportTarget::StreamableHttp { url: url.clone() };
            let sse = TransportTarget::Sse { url: url.clone() };
            let ws = TransportTarget::WebSocket {
                url: websocket_url(url),
            };
            let ladder = match kind {
                NetworkKind::WebSocket => vec![ws, http],
                NetworkKind::Sse => vec![sse, http],
                NetworkKind::StreamableHttp => vec![http, sse, ws],
            };
            TransportPlan::Attempts(ladder)
        }
        ServerConfig::Unusable { reason } => TransportPlan::Wildcard {
            reason: reason.clone(),
        },
    }
}
