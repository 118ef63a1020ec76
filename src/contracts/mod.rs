//! Trait seams for the two external collaborators the Memory Service
//! can plug in: an identity provider and an embedding
//! provider. Both are deliberately thin — this
//! module defines the boundary, concrete implementations live in
//! `crate::auth` and `crate::embeddings`.

use serde::{Deserialize, Serialize};

pub use crate::auth::IdentityProvider;
pub use crate::embeddings::EmbeddingProvider;

/// Generic health status, surfaced by the MCP server's health-check tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

#[async_trait::async_trait]
pub trait HealthCheck {
    async fn health(&self) -> anyhow::Result<HealthStatus>;
}
