//! Tool dispatch. Unlike the architectural donor (single-tenant, one fixed
//! storage handle per process), Cairn is multi-tenant: every call carries
//! the caller's already-resolved `MemoryService` for their own repository,
//! so a handler never owns storage itself.

pub mod memory_tools;

pub use memory_tools::MemoryTools;

use anyhow::Result;
use serde_json::Value;

use crate::mcp::types::ToolDefinition;
use crate::services::MemoryService;

#[async_trait::async_trait]
pub trait MCPToolHandler: Send + Sync {
    async fn handle_call(
        &self,
        service: &MemoryService,
        holder: &str,
        method: &str,
        params: Value,
    ) -> Result<Value>;

    fn get_tool_definitions(&self) -> Vec<ToolDefinition>;
}

/// Aggregates the registered tool handler sets. Cairn only has one
/// (`MemoryTools`); the registry still exists as a seam in case a second
/// handler family (e.g. an admin/maintenance tool set) is added later.
pub struct MCPToolRegistry {
    memory_tools: MemoryTools,
}

impl MCPToolRegistry {
    pub fn new() -> Self {
        Self {
            memory_tools: MemoryTools::new(),
        }
    }

    pub fn get_all_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.memory_tools.get_tool_definitions()
    }

    pub async fn handle_tool_call(
        &self,
        service: &MemoryService,
        holder: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.memory_tools
            .handle_call(service, holder, method, params)
            .await
    }
}

impl Default for MCPToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
