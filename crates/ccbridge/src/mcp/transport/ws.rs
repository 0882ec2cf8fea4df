//! Minimal MCP client over WebSocket.
//!
//! Speaks JSON-RPC 2.0 text frames: `initialize`, the `initialized`
//! notification, then paginated `tools/list`. Server-initiated requests are
//! answered (`ping`) or declined.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{MAX_TOOL_PAGES, ToolSession, TransportError, client_details};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBPROTOCOL: &str = "mcp";

#[derive(Debug, Deserialize)]
struct ToolPage {
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
}

pub struct WebSocketSession {
    url: Url,
    request_timeout: Duration,
    stream: Option<WsStream>,
    next_id: u64,
}

impl WebSocketSession {
    pub fn new(url: Url, request_timeout: Duration) -> Self {
        Self {
            url,
            request_timeout,
            stream: None,
            next_id: 1,
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        let (stream, _response) = tokio::time::timeout(self.request_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Connect("websocket handshake timed out".into()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, payload: JsonValue) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Connect("not connected".into()))?;
        stream
            .send(Message::text(payload.to_string()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    async fn notify(&mut self, method: &str) -> Result<(), TransportError> {
        self.send(json!({"jsonrpc": "2.0", "method": method})).await
    }

    async fn request(&mut self, method: &str, params: JsonValue) -> Result<JsonValue, TransportError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::Connect("not connected".into()))?;
            let frame = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| TransportError::Protocol(format!("{method} timed out")))?;
            let message = match frame {
                Some(Ok(m)) => m,
                Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                None => return Err(TransportError::Connect("connection closed".into())),
            };
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(TransportError::Connect("server closed the connection".into()));
                }
                _ => continue,
            };
            let value: JsonValue = serde_json::from_str(text.as_str())
                .map_err(|e| TransportError::Protocol(format!("invalid JSON-RPC frame: {e}")))?;

            if value.get("method").is_some() {
                if let Some(reply) = reply_to_server(&value) {
                    self.send(reply).await?;
                }
                continue;
            }
            if value.get("id").and_then(JsonValue::as_u64) == Some(id) {
                return rpc_result(value);
            }
        }
    }
}

/// Answer a server-initiated request; notifications get no reply.
fn reply_to_server(message: &JsonValue) -> Option<JsonValue> {
    let id = message.get("id")?.clone();
    let method = message.get("method").and_then(JsonValue::as_str).unwrap_or_default();
    if method == "ping" {
        return Some(json!({"jsonrpc": "2.0", "id": id, "result": {}}));
    }
    Some(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": -32601, "message": format!("method not found: {method}")}
    }))
}

fn rpc_result(response: JsonValue) -> Result<JsonValue, TransportError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(JsonValue::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown error");
        return Err(TransportError::Protocol(format!("{message} (code {code})")));
    }
    match response {
        JsonValue::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| TransportError::Protocol("response carries no result".into())),
        _ => Err(TransportError::Protocol("response is not an object".into())),
    }
}

#[async_trait]
impl ToolSession for WebSocketSession {
    async fn open_and_list(&mut self) -> Result<Vec<String>, TransportError> {
        self.connect().await?;

        let params = serde_json::to_value(client_details())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let init = self.request("initialize", params).await?;
        if init.get("protocolVersion").is_none() {
            return Err(TransportError::Protocol(
                "initialize result lacks protocolVersion".into(),
            ));
        }
        self.notify("notifications/initialized").await?;

        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match cursor.take() {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ToolPage = serde_json::from_value(result)
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
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.close(None).await
        {
            tracing::debug!("websocket close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_result_or_error() {
        let ok = rpc_result(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}})).unwrap();
        assert_eq!(ok, json!({"tools": []}));

        let err = rpc_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn answers_ping_and_declines_other_requests() {
        let pong = reply_to_server(&json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).unwrap();
        assert_eq!(pong["result"], json!({}));
        let declined =
            reply_to_server(&json!({"jsonrpc": "2.0", "id": "x", "method": "roots/list"})).unwrap();
        assert_eq!(declined["error"]["code"], json!(-32601));
        assert!(reply_to_server(&json!({"jsonrpc": "2.0", "method": "notifications/progress"})).is_none());
    }

    #[test]
    fn tool_page_tolerates_extra_fields() {
        let page: ToolPage = serde_json::from_value(json!({
            "tools": [{"name": "read", "inputSchema": {"type": "object"}}],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(page.tools[0].name, "read");
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // port 9 (discard) is essentially never listening on loopback
        let url = Url::parse("ws://127.0.0.1:9/").unwrap();
        let mut session = WebSocketSession::new(url, Duration::from_secs(2));
        let err = session.open_and_list().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        session.close().await;
    }

    #[tokio::test]
    async fn lists_every_page_from_a_loopback_server() {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let negotiate = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                let offered = req
                    .headers()
                    .get("Sec-WebSocket-Protocol")
                    .and_then(|v| v.to_str().ok());
                assert_eq!(offered, Some(SUBPROTOCOL));
                resp.headers_mut()
                    .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, negotiate).await.unwrap();

            let mut methods = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: JsonValue = serde_json::from_str(text.as_str()).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let id = request["id"].clone();
                methods.push(method.clone());
                let result = match method.as_str() {
                    "initialize" => {
                        // ping before answering; the client has to reply first
                        let ping = json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"});
                        ws.send(Message::text(ping.to_string())).await.unwrap();
                        let pong = ws.next().await.unwrap().unwrap();
                        let pong: JsonValue = serde_json::from_str(pong.to_text().unwrap()).unwrap();
                        assert_eq!(pong["id"], json!("srv-1"));
                        assert_eq!(pong["result"], json!({}));
                        // a response to someone else's request is skipped
                        let stray = json!({"jsonrpc": "2.0", "id": 999, "result": {}});
                        ws.send(Message::text(stray.to_string())).await.unwrap();
                        json!({
                            "protocolVersion": "2025-06-18",
                            "capabilities": {},
                            "serverInfo": {"name": "loopback", "version": "0.0.0"}
                        })
                    }
                    "notifications/initialized" => continue,
                    "tools/list" => match request["params"]["cursor"].as_str() {
                        None => json!({"tools": [{"name": "read"}], "nextCursor": "page-2"}),
                        Some("page-2") => json!({"tools": [{"name": "write"}]}),
                        Some(other) => panic!("unexpected cursor {other}"),
                    },
                    other => panic!("unexpected method {other}"),
                };
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                ws.send(Message::text(reply.to_string())).await.unwrap();
            }
            methods
        });

        let url = Url::parse(&format!("ws://{addr}/mcp")).unwrap();
        let mut session = WebSocketSession::new(url, Duration::from_secs(5));
        let names = session.open_and_list().await.unwrap();
        session.close().await;

        assert_eq!(names, vec!["read", "write"]);
        assert_eq!(
            server.await.unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );
    }
}
