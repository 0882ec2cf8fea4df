//! Shared types for MCP server declarations, discovered tools, and the
//! aggregated discovery result.

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Prefix shared by every fully-qualified MCP tool name.
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Tool name used when a server's catalog could not be listed.
pub const WILDCARD_TOOL: &str = "*";

/// Network transport family requested by a declaration's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkKind {
    StreamableHttp,
    Sse,
    WebSocket,
}

impl NetworkKind {
    /// Map a `type` tag onto a network kind. Missing and unrecognized tags
    /// select streamable HTTP.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("sse") => NetworkKind::Sse,
            Some("websocket") | Some("ws") => NetworkKind::WebSocket,
            _ => NetworkKind::StreamableHttp,
        }
    }
}

/// A declaration exactly as written in `.mcp.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One declared MCP server, validated once when its file is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transport", rename_all = "camelCase")]
pub enum ServerConfig {
    Local {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Network {
        kind: NetworkKind,
        url: String,
    },
    Unusable {
        reason: String,
    },
}

impl ServerConfig {
    /// Classify a raw declaration.
    ///
    /// `type: "stdio"` demands a command. Otherwise a non-blank `url` wins,
    /// then a non-blank `command`; anything else is unusable.
    pub fn from_raw(raw: RawServerConfig) -> Self {
        let command = raw.command.filter(|c| !c.trim().is_empty());
        let url = raw.url.filter(|u| !u.trim().is_empty());
        let is_stdio = raw
            .kind
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case("stdio"));

        if is_stdio {
            return match command {
                Some(command) => ServerConfig::Local {
                    command,
                    args: raw.args.unwrap_or_default(),
                    env: raw.env.unwrap_or_default(),
                },
                None => ServerConfig::Unusable {
                    reason: "stdio server declares no command".to_string(),
                },
            };
        }
        if let Some(url) = url {
            return ServerConfig::Network {
                kind: NetworkKind::from_tag(raw.kind.as_deref()),
                url: url.trim().to_string(),
            };
        }
        match command {
            Some(command) => ServerConfig::Local {
                command,
                args: raw.args.unwrap_or_default(),
                env: raw.env.unwrap_or_default(),
            },
            None => ServerConfig::Unusable {
                reason: "server declares neither a command nor a url".to_string(),
            },
        }
    }

    /// Validate an arbitrary JSON value from an `mcpServers` entry.
    pub fn from_value(value: &JsonValue) -> Self {
        if !value.is_object() {
            return ServerConfig::Unusable {
                reason: "server declaration is not an object".to_string(),
            };
        }
        match serde_json::from_value::<RawServerConfig>(value.clone()) {
            Ok(raw) => ServerConfig::from_raw(raw),
            Err(e) => ServerConfig::Unusable {
                reason: format!("invalid server declaration: {e}"),
            },
        }
    }
}

/// Servers declared in one `.mcp.json`, in declaration order.
///
/// `servers` drives discovery; `raw` is the file content as parsed and is
/// what gets serialized, so reports show declarations exactly as written.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub servers: IndexMap<String, ServerConfig>,
    pub raw: JsonValue,
}

impl Serialize for ProjectConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// A parsed config file and where it was found.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredConfig {
    pub path: PathBuf,
    pub config: ProjectConfig,
}

/// Build the `mcp__<server>__<tool>` identifier.
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{server}__{tool}")
}

/// A tool exposed by a server, with its fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub server_name: String,
    pub tool_name: String,
    pub full_tool_name: String,
}

impl ToolInfo {
    pub fn new(server: &str, tool: &str) -> Self {
        Self {
            server_name: server.to_string(),
            tool_name: tool.to_string(),
            full_tool_name: qualified_tool_name(server, tool),
        }
    }

    /// Placeholder granting every tool of a server whose catalog is unknown.
    pub fn wildcard(server: &str) -> Self {
        Self::new(server, WILDCARD_TOOL)
    }

    pub fn is_wildcard(&self) -> bool {
        self.tool_name == WILDCARD_TOOL
    }
}

/// Everything one discovery run produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub tools: Vec<ToolInfo>,
    pub allow_list: Vec<String>,
    pub mcp_configs: Vec<DiscoveredConfig>,
}

impl DiscoveryResult {
    pub fn new(tools: Vec<ToolInfo>, mcp_configs: Vec<DiscoveredConfig>) -> Self {
        let allow_list = tools.iter().map(|t| t.full_tool_name.clone()).collect();
        Self {
            tools,
            allow_list,
            mcp_configs,
        }
    }

    pub fn server_count(&self) -> usize {
        self.mcp_configs.iter().map(|c| c.config.servers.len()).sum()
    }
}
