//! The MCP server: resolves a caller's identity from request headers to a
//! `user_id`, lazily opens (and caches) that user's `MemoryService`, and
//! dispatches `tools/call` against it. Unlike the architectural donor,
//! which wires one fixed storage handle at process startup because it is
//! single-tenant, every request here can be a different user's repository.
//!
//! The transport is a plain Axum router over a single `/mcp` endpoint
//! speaking the method names `initialize`, `tools/list`, `tools/call`,
//! `capabilities`, `ping` — the same dispatch shape the donor's
//! `jsonrpc-core`/`jsonrpc-derive` surface names, without the session
//! manager, SSE backlog, and streaming resume machinery that HTTP framing
//! doesn't require here (stdio vs. HTTP framing is out of scope).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth::IdentityProvider;
use crate::config::AppConfig;
use crate::crypto::EncryptionKey;
use crate::index::{Index, SystemStore};
use crate::mcp::tools::{MCPToolHandler, MCPToolRegistry};
use crate::mcp::types::{MCPError, MCPRequest, MCPResponse};
use crate::services::{sync_service, MemoryService};

/// Everything one running server needs: configuration, the tool registry,
/// the system-wide repo registry, and a cache of already-opened per-user
/// services so a hot user doesn't pay repository-open cost every call.
pub struct MCPServer {
    config: Arc<AppConfig>,
    tool_registry: MCPToolRegistry,
    identity: Arc<dyn IdentityProvider>,
    system: Arc<SystemStore>,
    encryption_key: Option<EncryptionKey>,
    services: Mutex<HashMap<String, Arc<MemoryService>>>,
    start_time: Instant,
}

impl MCPServer {
    pub async fn new(
        config: Arc<AppConfig>,
        identity: Arc<dyn IdentityProvider>,
        system: Arc<SystemStore>,
    ) -> Result<Self> {
        let encryption_key = config
            .storage
            .encryption_key
            .as_deref()
            .map(EncryptionKey::from_base64)
            .transpose()
            .context("parsing storage.encryption_key")?;

        Ok(Self {
            config,
            tool_registry: MCPToolRegistry::new(),
            identity,
            system,
            encryption_key,
            services: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        })
    }

    /// Look up (or lazily open) the `MemoryService` for `user_id`.
    async fn service_for(&self, user_id: &str) -> Result<Arc<MemoryService>> {
        {
            let cache = self.services.lock().await;
            if let Some(service) = cache.get(user_id) {
                return Ok(service.clone());
            }
        }

        let repo_root = self.config.repo_path_for(user_id);
        std::fs::create_dir_all(&repo_root)
            .with_context(|| format!("creating repository directory for '{user_id}'"))?;
        #[cfg(feature = "git-integration")]
        {
            let repo = match crate::git::Repository::open(&repo_root) {
                Ok(repo) => repo,
                Err(_) => crate::git::Repository::init(&repo_root)
                    .with_context(|| format!("initializing repository for '{user_id}'"))?,
            };
            repo.seed_layout(user_id)
                .with_context(|| format!("seeding repository layout for '{user_id}'"))?;
        }

        let index = Index::open(&repo_root).await?;
        let service = Arc::new(MemoryService::new(
            index,
            repo_root,
            "cairn-mcp",
            "cairn-mcp@localhost",
        ));

        let mut cache = self.services.lock().await;
        let service = cache.entry(user_id.to_string()).or_insert(service).clone();
        Ok(service)
    }

    fn tool_definitions(&self) -> serde_json::Value {
        serde_json::json!({ "tools": self.tool_registry.get_all_tool_definitions() })
    }

    fn capabilities(&self) -> serde_json::Value {
        serde_json::json!({
            "tools": {},
            "serverInfo": {
                "name": "cairn-mcp",
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(
        &self,
        headers: &HeaderMap,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let user_id = self.identity.identify(headers)?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .context("missing 'name' in tools/call params")?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let service = self.service_for(&user_id).await?;

        let result = if name == "cairn://sync" {
            self.call_sync(&user_id, &service).await?
        } else {
            self.tool_registry
                .handle_tool_call(&service, &user_id, name, arguments)
                .await?
        };

        Ok(serde_json::json!({
            "content": [{ "type": "text", "text": result.to_string() }],
        }))
    }

    async fn call_sync(
        &self,
        user_id: &str,
        service: &Arc<MemoryService>,
    ) -> Result<serde_json::Value> {
        let index = service.index.clone();
        let (report, fresh_index) = sync_service::sync_repository(
            &self.system,
            self.encryption_key.as_ref(),
            user_id,
            service.repo_root(),
            index,
        )
        .await?;

        let refreshed = Arc::new(MemoryService::new(
            fresh_index,
            service.repo_root(),
            &service.commit_author,
            &service.commit_author_email,
        ));
        self.services
            .lock()
            .await
            .insert(user_id.to_string(), refreshed);

        Ok(serde_json::json!({
            "pushed": report.pushed,
            "conflict_resolution_commit": report.conflict_resolution_commit,
            "memories_indexed": report.rebuild.memories_indexed,
        }))
    }

    /// Handle one JSON-RPC request and produce its response. Errors other
    /// than tool-call failures are surfaced as JSON-RPC error objects
    /// rather than HTTP error statuses, matching standard JSON-RPC practice.
    async fn process(&self, headers: &HeaderMap, request: MCPRequest) -> MCPResponse {
        let result = match request.method.as_str() {
            "initialize" => Ok(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "cairn-mcp", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": self.capabilities(),
            })),
            "tools/list" => Ok(self.tool_definitions()),
            "tools/call" => self.call_tool(headers, request.params).await,
            "capabilities" => Ok(self.capabilities()),
            "ping" => Ok(serde_json::json!({
                "status": "ok",
                "uptime_seconds": self.start_time.elapsed().as_secs(),
            })),
            other => Err(anyhow::anyhow!("method not found: {other}")),
        };

        match result {
            Ok(value) => MCPResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: Some(value),
                error: None,
            },
            Err(e) => {
                warn!(method = %request.method, error = %e, "mcp request failed");
                let error = classify_error(&request.method, &e);
                MCPResponse {
                    jsonrpc: "2.0".to_string(),
                    id: request.id,
                    result: None,
                    error: Some(error),
                }
            }
        }
    }

    pub fn into_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp_request))
            .with_state(self)
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr =
            format!("{}:{}", self.config.server.host, self.config.server.port).parse()?;
        let router = self.into_router();
        info!(%addr, "starting cairn MCP server");

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding MCP server to {addr}"))?;
        axum::serve(listener, router)
            .await
            .context("MCP server stopped")
    }
}

fn classify_error(method: &str, err: &anyhow::Error) -> MCPError {
    const KNOWN_METHODS: [&str; 5] = ["initialize", "tools/list", "tools/call", "capabilities", "ping"];
    if method == "tools/call" {
        MCPError::tool_error(&err.to_string())
    } else if err.to_string().contains("missing identity") {
        MCPError::unauthenticated(&err.to_string())
    } else if !KNOWN_METHODS.contains(&method) {
        MCPError::method_not_found(method)
    } else {
        MCPError::internal_error(&err.to_string())
    }
}

async fn handle_mcp_request(
    State(server): State<Arc<MCPServer>>,
    headers: HeaderMap,
    Json(request): Json<MCPRequest>,
) -> Json<MCPResponse> {
    Json(server.process(&headers, request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticIdentityProvider;
    use crate::mcp::types::{error_codes, RequestId};

    async fn test_server() -> Arc<MCPServer> {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.repos_root = dir.path().to_string_lossy().to_string();
        let system = Arc::new(SystemStore::open("sqlite::memory:").await.unwrap());
        let identity = Arc::new(StaticIdentityProvider::new(Some("tester".to_string())));
        Arc::new(
            MCPServer::new(Arc::new(config), identity, system)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn ping_reports_ok_without_identity() {
        let server = test_server().await;
        let response = server
            .process(
                &HeaderMap::new(),
                MCPRequest {
                    jsonrpc: "2.0".to_string(),
                    id: RequestId::Number(1),
                    method: "ping".to_string(),
                    params: serde_json::Value::Null,
                },
            )
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_method_is_a_method_not_found_error() {
        let server = test_server().await;
        let response = server
            .process(
                &HeaderMap::new(),
                MCPRequest {
                    jsonrpc: "2.0".to_string(),
                    id: RequestId::Number(2),
                    method: "nonsense".to_string(),
                    params: serde_json::Value::Null,
                },
            )
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn remember_then_recall_round_trips_through_tools_call() {
        let server = test_server().await;

        let remember_params = serde_json::json!({
            "name": "cairn://remember",
            "arguments": { "title": "Alpha", "content": "Body" },
        });
        let response = server
            .process(
                &HeaderMap::new(),
                MCPRequest {
                    jsonrpc: "2.0".to_string(),
                    id: RequestId::Number(3),
                    method: "tools/call".to_string(),
                    params: remember_params,
                },
            )
            .await;
        assert!(response.error.is_none(), "{:?}", response.error);

        let recall_params = serde_json::json!({
            "name": "cairn://recall",
            "arguments": { "query": "alpha", "limit": 10 },
        });
        let response = server
            .process(
                &HeaderMap::new(),
                MCPRequest {
                    jsonrpc: "2.0".to_string(),
                    id: RequestId::Number(4),
                    method: "tools/call".to_string(),
                    params: recall_params,
                },
            )
            .await;
        assert!(response.error.is_none(), "{:?}", response.error);
    }
}
