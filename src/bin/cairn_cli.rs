//! Thin maintenance CLI for operating a single user's repository outside
//! the MCP tool surface: initialize a new repository, force-rebuild its
//! Index from the worktree, or run one sync cycle by hand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cairn::config::{AppConfig, CliOverrides};
use cairn::index::{Index, SystemStore};
use cairn::rebuilder;
use cairn::services::sync_service;
use cairn::types::RepoRecord;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn-cli",
    version,
    about = "Maintenance operations for a Cairn memory repository"
)]
struct Cli {
    /// Configuration file path (also read from CAIRN_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// User whose repository this command operates on
    #[arg(short, long)]
    user_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and register a new repository for this user
    Init,
    /// Rebuild the Index from the worktree's Markdown files
    Rebuild {
        /// Required when the Index already has entries, since rebuild is destructive
        #[arg(long)]
        force: bool,
    },
    /// Run one fetch/pull/push cycle against the configured remote, then rebuild
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cairn::init_logging()?;

    let overrides = CliOverrides {
        config_file: cli.config,
        ..Default::default()
    };
    let config = AppConfig::load(&overrides)?;
    let repo_root = config.repo_path_for(&cli.user_id);

    match cli.command {
        Commands::Init => init_repo(&config, &cli.user_id, &repo_root).await,
        Commands::Rebuild { force } => rebuild_repo(&repo_root, force).await,
        Commands::Sync => sync_repo(&config, &cli.user_id, &repo_root).await,
    }
}

async fn init_repo(config: &AppConfig, user_id: &str, repo_root: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(repo_root)
        .with_context(|| format!("creating repository directory {}", repo_root.display()))?;

    #[cfg(feature = "git-integration")]
    {
        let repo = if let Ok(repo) = cairn::git::Repository::open(repo_root) {
            println!("Repository already exists at {}", repo_root.display());
            repo
        } else {
            let repo = cairn::git::Repository::init(repo_root)
                .with_context(|| format!("initializing git repository at {}", repo_root.display()))?;
            println!("Initialized git repository at {}", repo_root.display());
            repo
        };
        repo.seed_layout(user_id)
            .with_context(|| format!("seeding repository layout for '{user_id}'"))?;
    }

    let system = SystemStore::open(&format!(
        "sqlite://{}?mode=rwc",
        config.storage.system_db_path
    ))
    .await?;
    system
        .upsert_repo(&RepoRecord {
            user_id: user_id.to_string(),
            repo_path: repo_root.to_string_lossy().to_string(),
            encrypted_remote_credential: None,
        })
        .await?;
    system.close().await;

    let index = Index::open(repo_root).await?;
    index.close().await;

    println!("Registered repository for '{user_id}'");
    Ok(())
}

async fn rebuild_repo(repo_root: &PathBuf, force: bool) -> Result<()> {
    let index = Index::open(repo_root).await?;
    let report = rebuilder::rebuild(repo_root, &index, force).await?;
    index.close().await;

    println!("Rebuild complete:");
    println!("  memories indexed:    {}", report.memories_indexed);
    println!("  archived indexed:    {}", report.archived_indexed);
    println!("  associations linked: {}", report.associations_linked);
    println!("  annotations attached: {}", report.annotations_attached);
    for warning in &report.warnings {
        eprintln!("  warning: {warning}");
    }
    Ok(())
}

async fn sync_repo(config: &AppConfig, user_id: &str, repo_root: &PathBuf) -> Result<()> {
    let system = SystemStore::open(&format!(
        "sqlite://{}?mode=rwc",
        config.storage.system_db_path
    ))
    .await?;
    let encryption_key = config
        .storage
        .encryption_key
        .as_deref()
        .map(cairn::crypto::EncryptionKey::from_base64)
        .transpose()
        .context("parsing storage.encryption_key")?;

    let index = Index::open(repo_root).await?;
    let (report, index) =
        sync_service::sync_repository(&system, encryption_key.as_ref(), user_id, repo_root, index)
            .await?;
    index.close().await;
    system.close().await;

    println!("Sync complete:");
    println!("  pushed:                  {}", report.pushed);
    println!(
        "  conflict resolution commit: {:?}",
        report.conflict_resolution_commit
    );
    println!("  memories indexed:        {}", report.rebuild.memories_indexed);
    Ok(())
}
