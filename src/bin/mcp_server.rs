//! Cairn MCP Server binary: wires configuration, identity resolution, and
//! the repository registry, then serves the seven memory tools over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use cairn::config::{AppConfig, CliOverrides};
use cairn::crypto::EncryptionKey;
use cairn::index::SystemStore;
use cairn::mcp::MCPServer;
use cairn::scheduler::{Scheduler, SchedulerConfig};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "cairn-mcp-server",
    version,
    about = "Cairn MCP server: exposes per-user memory tools over HTTP"
)]
struct Cli {
    /// Configuration file path (also read from CAIRN_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// Server bind host, overrides config and CAIRN_SERVER_HOST
    #[arg(long)]
    host: Option<String>,

    /// Server bind port, overrides config and CAIRN_SERVER_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Parent directory for per-user repositories, overrides config and CAIRN_REPOS_ROOT
    #[arg(long)]
    repos_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cairn::init_logging()?;

    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        repos_root: cli.repos_root,
        config_file: cli.config,
    };
    let config = Arc::new(AppConfig::load(&overrides)?);
    tracing::info!(host = %config.server.host, port = config.server.port, "loaded configuration");

    std::fs::create_dir_all(&config.storage.repos_root)
        .context("creating repos_root directory")?;
    if let Some(parent) = std::path::Path::new(&config.storage.system_db_path).parent() {
        std::fs::create_dir_all(parent).context("creating system_db_path parent directory")?;
    }

    let system = Arc::new(
        SystemStore::open(&format!("sqlite://{}?mode=rwc", config.storage.system_db_path)).await?,
    );
    let identity: Arc<dyn cairn::auth::IdentityProvider> = Arc::new(
        cairn::auth::StaticIdentityProvider::new(config.auth.default_user_id.clone()),
    );
    let encryption_key = config
        .storage
        .encryption_key
        .as_deref()
        .map(EncryptionKey::from_base64)
        .transpose()
        .context("parsing storage.encryption_key")?;

    let _scheduler = config.scheduler.enabled.then(|| {
        Scheduler::spawn(
            system.clone(),
            encryption_key.clone(),
            SchedulerConfig {
                sweep_interval: config.scheduler.sweep_interval,
            },
        )
    });

    let server = Arc::new(MCPServer::new(config, identity, system).await?);
    server.serve().await
}
