//! The seven MCP tools over a Memory Service: `remember`,
//! `recall`, `connect`, `history`, `forget`, `restore`, `sync`. Each
//! handler deserializes its `params` into the matching request struct,
//! delegates to the service function that already does the real work,
//! and serializes the outcome back into a plain JSON value.

use anyhow::Result;
use serde_json::{json, Value};

use crate::mcp::tools::MCPToolHandler;
use crate::mcp::types::{
    error_codes, ConnectParams, ForgetParams, HistoryParams, RecallParams, RememberParams,
    RestoreParams, SyncParams, ToolDefinition,
};
use crate::services::{
    connect_service, history_service, lifecycle_service, recall_service, remember_service,
    MemoryService,
};

pub struct MemoryTools;

impl MemoryTools {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MemoryTools {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MCPToolHandler for MemoryTools {
    async fn handle_call(
        &self,
        service: &MemoryService,
        holder: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        tracing::debug!(method, "handling memory tool call");

        match method {
            "cairn://remember" => self.handle_remember(service, holder, params).await,
            "cairn://recall" => self.handle_recall(service, params).await,
            "cairn://connect" => self.handle_connect(service, holder, params).await,
            "cairn://history" => self.handle_history(service, params).await,
            "cairn://forget" => self.handle_forget(service, holder, params).await,
            "cairn://restore" => self.handle_restore(service, holder, params).await,
            "cairn://sync" => self.handle_sync(service, params).await,
            _ => Err(anyhow::anyhow!("Unknown method: {method}")),
        }
    }

    fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            self.define_remember_tool(),
            self.define_recall_tool(),
            self.define_connect_tool(),
            self.define_history_tool(),
            self.define_forget_tool(),
            self.define_restore_tool(),
            self.define_sync_tool(),
        ]
    }
}

impl MemoryTools {
    fn define_remember_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://remember".to_string(),
            description: "Create a new memory, or update an existing one by slug".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": { "type": "string", "description": "Update this memory instead of creating a new one" },
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "category": { "type": "string" },
                    "path": { "type": "string", "description": "Overrides the derived category/date folder entirely" },
                    "note": { "type": "string", "description": "Free-form annotation, auto-typed by keyword" },
                    "supersedes": { "type": "string", "description": "Slug of a memory this one replaces" },
                    "connections": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Slugs to auto-connect to as related_to"
                    }
                },
                "required": ["title", "content"],
                "additionalProperties": false
            }),
        }
    }

    async fn handle_remember(&self, service: &MemoryService, holder: &str, params: Value) -> Result<Value> {
        let p: RememberParams = serde_json::from_value(params)?;
        let outcome = remember_service::remember(
            service,
            holder,
            remember_service::RememberRequest {
                slug: p.slug,
                title: p.title,
                content: p.content,
                tags: p.tags,
                category: p.category,
                path: p.path,
                note: p.note,
                supersedes: p.supersedes,
                connections: p.connections,
            },
        )
        .await?;

        Ok(json!({
            "slug": outcome.slug.as_str(),
            "created": outcome.created,
            "commit": outcome.commit,
            "annotation_commit": outcome.annotation_commit,
            "supersede_commit": outcome.supersede_commit,
            "failed_connections": outcome.failed_connections,
        }))
    }

    fn define_recall_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://recall".to_string(),
            description: "Retrieve memories: list everything, grep for an exact substring, or rank a topic across title/tag/content/semantic/association strategies".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "topic": { "type": "string", "description": "Ranked union search across title, tags, content, semantic similarity, and one-hop associations" },
                    "exact": { "type": "string", "description": "Grep-backed exact substring search over memory content" },
                    "list_all": { "type": "boolean", "default": false, "description": "List every visible memory, newest first" },
                    "path_filter": { "type": "string", "description": "Only return memories whose file path starts with this prefix" },
                    "since": { "type": "string", "description": "Relative (e.g. '7d', '2w', '1m') or ISO-8601 window" },
                    "include_archived": { "type": "boolean", "default": false },
                    "include_superseded": { "type": "boolean", "default": false },
                    "limit": { "type": "integer", "default": 10, "minimum": 1 }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn handle_recall(&self, service: &MemoryService, params: Value) -> Result<Value> {
        let p: RecallParams = if params.is_null() {
            RecallParams::default()
        } else {
            serde_json::from_value(params)?
        };

        let result = recall_service::recall(
            service,
            &recall_service::RecallOptions {
                topic: p.topic,
                exact: p.exact,
                list_all: p.list_all,
                path_filter: p.path_filter,
                since: p.since,
                include_archived: p.include_archived,
                include_superseded: p.include_superseded,
                limit: p.limit,
            },
        )
        .await?;

        let hits: Vec<Value> = result
            .hits
            .iter()
            .map(|hit| {
                json!({
                    "slug": hit.memory.slug.as_str(),
                    "title": hit.memory.title.as_str(),
                    "score": hit.score,
                    "match_sources": hit.match_sources.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();

        Ok(json!({ "hits": hits }))
    }

    fn define_connect_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://connect".to_string(),
            description: "Create a typed association between two memories".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "target": { "type": "string" },
                    "association_type": {
                        "type": "string",
                        "enum": ["related_to", "references", "follows", "precedes", "supersedes", "part_of", "related_project", "person"]
                    },
                    "strength": { "type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.5 },
                    "disconnect": { "type": "boolean", "default": false, "description": "Remove the edge instead of creating it" }
                },
                "required": ["source", "target", "association_type"],
                "additionalProperties": false
            }),
        }
    }

    async fn handle_connect(&self, service: &MemoryService, holder: &str, params: Value) -> Result<Value> {
        let p: ConnectParams = serde_json::from_value(params)?;
        let outcome = if p.disconnect {
            connect_service::disconnect(
                service,
                holder,
                &p.source,
                &p.target,
                &p.association_type,
            )
            .await?
        } else {
            connect_service::connect(
                service,
                holder,
                &p.source,
                &p.target,
                &p.association_type,
                p.strength,
            )
            .await?
        };

        Ok(json!({ "commit": outcome.commit }))
    }

    fn define_history_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://history".to_string(),
            description: "List git commits for one memory, or the whole repository when no slug is given".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": { "type": "string" },
                    "since": { "type": "string" },
                    "message_regex": { "type": "string" },
                    "limit": { "type": "integer", "default": 50, "minimum": 1 }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn handle_history(&self, service: &MemoryService, params: Value) -> Result<Value> {
        let p: HistoryParams = if params.is_null() {
            HistoryParams::default()
        } else {
            serde_json::from_value(params)?
        };

        let commits = history_service::history(
            service,
            &history_service::HistoryOptions {
                slug: p.slug,
                since: p.since,
                message_regex: p.message_regex,
                limit: p.limit,
            },
        )
        .await?;

        Ok(json!({ "commits": commits }))
    }

    fn define_forget_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://forget".to_string(),
            description: "Soft-delete a memory into the archive".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "slug": { "type": "string" } },
                "required": ["slug"],
                "additionalProperties": false
            }),
        }
    }

    async fn handle_forget(&self, service: &MemoryService, holder: &str, params: Value) -> Result<Value> {
        let p: ForgetParams = serde_json::from_value(params)?;
        let outcome = lifecycle_service::forget(service, holder, &p.slug).await?;
        Ok(json!({
            "commit": outcome.commit,
            "cleared_supersession_commit": outcome.cleared_supersession_commit,
        }))
    }

    fn define_restore_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://restore".to_string(),
            description: "Unarchive a previously forgotten memory".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "slug": { "type": "string" } },
                "required": ["slug"],
                "additionalProperties": false
            }),
        }
    }

    async fn handle_restore(&self, service: &MemoryService, holder: &str, params: Value) -> Result<Value> {
        let p: RestoreParams = serde_json::from_value(params)?;
        let outcome = lifecycle_service::restore(service, holder, &p.slug).await?;
        Ok(json!({
            "commit": outcome.commit,
            "cleared_supersession_commit": outcome.cleared_supersession_commit,
        }))
    }

    fn define_sync_tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cairn://sync".to_string(),
            description: "Fetch, pull, and push against the configured remote, then rebuild the Index".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    /// `sync` is the one tool that needs more than a `MemoryService` — it
    /// needs the system store and encryption key, which the server layer
    /// doesn't have a seam to pass through `MCPToolHandler::handle_call`
    /// for. Routed here just for schema/definition purposes; the actual
    /// dispatch happens in `MCPServer::call_tool`, which has direct access
    /// to both.
    async fn handle_sync(&self, _service: &MemoryService, params: Value) -> Result<Value> {
        let _p: SyncParams = if params.is_null() {
            SyncParams::default()
        } else {
            serde_json::from_value(params)?
        };
        Err(anyhow::anyhow!(
            "cairn://sync must be dispatched by MCPServer directly, not through MemoryTools"
        ))
    }
}

/// Build an `MCPError`-shaped JSON error response body for a failed tool
/// call, used by the transport layer when `handle_call` returns `Err`.
pub fn tool_error_value(err: &anyhow::Error) -> Value {
    json!({
        "code": error_codes::TOOL_ERROR,
        "message": err.to_string(),
    })
}
