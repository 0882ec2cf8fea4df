//! MCP tool discovery and permission synthesis for the Claude CLI.
//!
//! The core pipeline locates `.mcp.json` declarations in a project tree,
//! enumerates each declared server's tools over the best transport it can
//! negotiate, and merges the resulting allow-list into
//! `.claude/settings.json`. Around it sit thin collaborators for invoking the
//! `claude` binary and loading `CLAUDE.md` memory files.

pub mod assistant;
pub mod bridge;
pub mod config;
pub mod events;
pub mod mcp;
pub mod memory;
pub mod policy;

pub use mcp::aggregate::{DiscoveryOptions, discover_mcp_tools};
pub use mcp::types::{DiscoveredConfig, DiscoveryResult, ServerConfig, ToolInfo};
pub use policy::{PolicyError, setup_mcp_permissions, update_settings};
