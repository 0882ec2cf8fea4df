//! Transport sessions used to list a server's tools.
//!
//! A [`TransportFactory`] turns one rung of the negotiated ladder into an
//! unconnected [`ToolSession`]. The default factory drives stdio, SSE and
//! streamable HTTP through `rust-mcp-sdk`, and WebSocket through a small
//! JSON-RPC client on `tokio-tungstenite`.

pub mod sdk;
pub mod ws;

use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, LATEST_PROTOCOL_VERSION,
};
use url::Url;

use super::negotiate::TransportTarget;

/// Upper bound on `tools/list` pages followed for one server.
pub const MAX_TOOL_PAGES: usize = 64;

/// Name this client announces during `initialize`.
pub const CLIENT_NAME: &str = "ccbridge-discovery";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid address `{url}`: {reason}")]
    InvalidAddress { url: String, reason: String },
    #[error("failed to construct transport: {0}")]
    Construct(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server returned more than {MAX_TOOL_PAGES} pages of tools")]
    TooManyPages,
}

/// A session that can connect to one server and list its tools.
#[async_trait]
pub trait ToolSession: Send {
    /// Connect, initialize, and return every tool name the server exposes.
    async fn open_and_list(&mut self) -> Result<Vec<String>, TransportError>;

    /// Release the connection and any child process. Safe to call on a
    /// session that never opened.
    async fn close(&mut self);
}

/// Builds unconnected sessions for ladder rungs.
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        server: &str,
        target: &TransportTarget,
    ) -> Result<Box<dyn ToolSession>, TransportError>;
}

/// Production factory backed by `rust-mcp-sdk` and `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct SdkTransportFactory {
    /// Per-request timeout handed to the underlying transports.
    pub request_timeout: Duration,
}

impl Default for SdkTransportFactory {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportFactory for SdkTransportFactory {
    fn build(
        &self,
        server: &str,
        target: &TransportTarget,
    ) -> Result<Box<dyn ToolSession>, TransportError> {
        tracing::trace!(%server, transport = %target.kind(), "building session");
        match target {
            TransportTarget::Stdio { command, args, env } => Ok(Box::new(
                sdk::SdkSession::stdio(command, args, env, self.request_timeout)?,
            )),
            TransportTarget::Sse { url } => {
                let url = require_scheme(url, &["http", "https"])?;
                Ok(Box::new(sdk::SdkSession::sse(&url, self.request_timeout)?))
            }
            TransportTarget::StreamableHttp { url } => {
                let url = require_scheme(url, &["http", "https"])?;
                Ok(Box::new(sdk::SdkSession::streamable_http(
                    &url,
                    self.request_timeout,
                )))
            }
            TransportTarget::WebSocket { url } => {
                let url = require_scheme(url, &["ws", "wss"])?;
                Ok(Box::new(ws::WebSocketSession::new(url, self.request_timeout)))
            }
        }
    }
}

/// Parse `raw` and insist on one of `schemes`.
pub fn require_scheme(raw: &str, schemes: &[&str]) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|e| TransportError::InvalidAddress {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(TransportError::InvalidAddress {
            url: raw.to_string(),
            reason: format!("expected scheme {}", schemes.join(" or ")),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TransportError::InvalidAddress {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// `initialize` parameters sent by every transport.
pub fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.into(),
    }
}
