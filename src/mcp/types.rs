//! MCP protocol envelope types (JSON-RPC 2.0 shape) plus the request
//! schemas for Cairn's seven tools.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: Option<String>,
}

/// Request params for each of the seven tools. Deserialized from the
/// `arguments` field of a `tools/call` request by the matching handler in
/// `crate::mcp::tools::memory_tools`.
#[derive(Debug, Clone, Deserialize)]
pub struct RememberParams {
    pub slug: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Overrides the derived category/date folder entirely.
    pub path: Option<String>,
    pub note: Option<String>,
    pub supersedes: Option<String>,
    /// Slugs to auto-connect to (as `related_to`) once the memory exists.
    #[serde(default)]
    pub connections: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecallParams {
    /// Ranked union of title/tag/content/semantic/association strategies.
    pub topic: Option<String>,
    /// Grep-backed exact substring search.
    pub exact: Option<String>,
    /// List every visible memory, newest first.
    #[serde(default)]
    pub list_all: bool,
    pub path_filter: Option<String>,
    pub since: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub include_superseded: bool,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub source: String,
    pub target: String,
    pub association_type: String,
    pub strength: Option<f64>,
    /// When true, removes the edge (and its reverse, for non-directional
    /// types) instead of creating it.
    #[serde(default)]
    pub disconnect: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    pub slug: Option<String>,
    pub since: Option<String>,
    pub message_regex: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgetParams {
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreParams {
    pub slug: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncParams {}

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Raised when no identity could be resolved from the request headers.
    pub const UNAUTHENTICATED: i32 = -32001;
    /// Raised by a tool handler for a domain error (not-found, validation,
    /// optimistic-concurrency conflict, lock contention).
    pub const TOOL_ERROR: i32 = -32002;
}

impl MCPError {
    pub fn parse_error(message: &str) -> Self {
        Self {
            code: error_codes::PARSE_ERROR,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn invalid_request(message: &str) -> Self {
        Self {
            code: error_codes::INVALID_REQUEST,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: error_codes::METHOD_NOT_FOUND,
            message: format!("Method '{method}' not found"),
            data: None,
        }
    }

    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: error_codes::INVALID_PARAMS,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self {
            code: error_codes::INTERNAL_ERROR,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn unauthenticated(message: &str) -> Self {
        Self {
            code: error_codes::UNAUTHENTICATED,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn tool_error(message: &str) -> Self {
        Self {
            code: error_codes::TOOL_ERROR,
            message: message.to_string(),
            data: None,
        }
    }
}
