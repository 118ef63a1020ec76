//! MCP server: exposes the seven memory tools over JSON-RPC-shaped
//! requests.

pub mod server;
pub mod tools;
pub mod types;

pub use server::MCPServer;
pub use types::*;
