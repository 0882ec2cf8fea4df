//! MCP server discovery: locate declarations, negotiate a transport per
//! server, enumerate tools, and aggregate the results.

pub mod aggregate;
pub mod enumerator;
pub mod locator;
pub mod negotiate;
pub mod transport;
pub mod types;

pub use types::*;
