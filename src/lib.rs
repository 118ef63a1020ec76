//! Cairn: a per-user memory store backed by a git worktree of Markdown
//! files and a co-located SQLite Index, exposed to clients over MCP.
//!
//! The worktree is the source of truth; the Index mirrors it for fast
//! lookups and can always be regenerated from the files by the
//! `rebuilder`. Every mutating operation funnels through `services`,
//! bracketed by the `locker`'s per-slug lease lock.

pub mod auth;
pub mod config;
pub mod contracts;
pub mod crypto;
pub mod embeddings;
pub mod errors;
pub mod graph;
pub mod index;
pub mod locker;
pub mod markdown;
pub mod mcp;
pub mod observability;
pub mod organizer;
pub mod rebuilder;
pub mod scheduler;
pub mod services;
pub mod sync;
pub mod types;
pub mod validation;

#[cfg(feature = "git-integration")]
pub mod git;

pub use config::{AppConfig, CliOverrides};
pub use errors::CairnError;
pub use index::{Index, SystemStore};
pub use mcp::MCPServer;
pub use observability::{init_logging, init_logging_with_level};
pub use services::MemoryService;
pub use types::{
    Annotation, AnnotationType, Association, AssociationType, Memory, RepoRecord, Slug,
    Strength, Tag, Title,
};
