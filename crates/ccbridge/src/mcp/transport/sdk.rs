//! Sessions over the `rust-mcp-sdk` client runtimes (stdio, SSE, streamable
//! HTTP).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{
    ClientHandlerCore, ClientRuntime, McpClientOptions, ToMcpClientHandlerCore,
    client_runtime_core,
};
use rust_mcp_sdk::schema::{
    NotificationFromServer, PaginatedRequestParams, ResultFromClient, RpcError,
    ServerJsonrpcRequest,
};
use rust_mcp_sdk::{
    ClientSseTransport, ClientSseTransportOptions, RequestOptions, StdioTransport,
    StreamableTransportOptions, TransportOptions,
};
use url::Url;

use super::{MAX_TOOL_PAGES, ToolSession, TransportError, client_details};
use crate::mcp::negotiate::TransportKind;

const SSE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A client runtime that has been built but not started.
pub struct SdkSession {
    kind: TransportKind,
    client: Arc<ClientRuntime>,
    started: bool,
}

impl SdkSession {
    /// Prepare a stdio server launch. The process is spawned on open.
    pub fn stdio(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let transport = StdioTransport::create_with_server_launch(
            command,
            args.to_vec(),
            Some(env.clone()),
            TransportOptions {
                timeout: request_timeout,
            },
        )
        .map_err(|e| TransportError::Construct(e.to_string()))?;

        let client = client_runtime_core::create_client(McpClientOptions {
            client_details: client_details(),
            transport,
            handler: NoopClientHandler.to_mcp_client_handler(),
            task_store: None,
            server_task_store: None,
        });
        Ok(Self {
            kind: TransportKind::Stdio,
            client,
            started: false,
        })
    }

    pub fn sse(url: &Url, request_timeout: Duration) -> Result<Self, TransportError> {
        let transport = ClientSseTransport::new(
            url.as_str(),
            ClientSseTransportOptions {
                request_timeout,
                retry_delay: Some(SSE_RETRY_DELAY),
                max_retries: Some(1),
                custom_headers: None,
            },
        )
        .map_err(|e| TransportError::Construct(e.to_string()))?;

        let client = client_runtime_core::create_client(McpClientOptions {
            client_details: client_details(),
            transport,
            handler: NoopClientHandler.to_mcp_client_handler(),
            task_store: None,
            server_task_store: None,
        });
        Ok(Self {
            kind: TransportKind::Sse,
            client,
            started: false,
        })
    }

    pub fn streamable_http(url: &Url, request_timeout: Duration) -> Self {
        let options = StreamableTransportOptions {
            mcp_url: url.to_string(),
            request_options: RequestOptions {
                request_timeout,
                max_retries: Some(1),
                ..RequestOptions::default()
            },
        };
        let client = client_runtime_core::with_transport_options(
            client_details(),
            options,
            NoopClientHandler,
            None,
            None,
        );
        Self {
            kind: TransportKind::StreamableHttp,
            client,
            started: false,
        }
    }
}

#[async_trait]
impl ToolSession for SdkSession {
    async fn open_and_list(&mut self) -> Result<Vec<String>, TransportError> {
        self.started = true;
        self.client
            .clone()
            .start()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| PaginatedRequestParams {
                cursor: Some(c),
                meta: None,
            });
            let page = self
                .client
                .request_tool_list(params)
                .await
                .map_err(|e| TransportError::Protocol(format!("tools/list: {e}")))?;
            names.extend(page.tools.into_iter().map(|t| t.name));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(names),
            }
        }
        Err(TransportError::TooManyPages)
    }

    async fn close(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        match self.kind {
            // also sends the session DELETE
            TransportKind::StreamableHttp => self.client.terminate_session().await,
            _ => {
                if let Err(e) = self.client.shut_down().await {
                    tracing::debug!(transport = %self.kind, "shutdown error: {}", e);
                }
            }
        }
    }
}

/// Declines every server-initiated request; discovery only lists tools.
#[derive(Clone)]
struct NoopClientHandler;

#[async_trait]
impl ClientHandlerCore for NoopClientHandler {
    async fn handle_request(
        &self,
        _request: ServerJsonrpcRequest,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }
}
