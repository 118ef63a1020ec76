//! Layered application configuration:
//! built-in defaults < TOML file < environment variables < CLI flags.
//! Mirrors the shape of `mcp::config::MCPConfig`, generalized to
//! Cairn's own sections.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerSettings,
    pub embeddings: crate::embeddings::EmbeddingConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_string")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Parent directory under which each user's repository lives, as
    /// `{repos_root}/{user_id}`.
    pub repos_root: String,
    /// Path to the system store's SQLite database (the repo registry).
    pub system_db_path: String,
    /// Base64-encoded AES-256 key used to seal remote credentials. When
    /// absent, `connect`/`sync` against authenticated remotes is unavailable.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    #[serde(with = "duration_string")]
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Used by `StaticIdentityProvider` when no identity header is present.
    pub default_user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8420,
                request_timeout: Duration::from_secs(30),
            },
            storage: StorageConfig {
                repos_root: "./cairn-data".to_string(),
                system_db_path: "./cairn-data/system.db".to_string(),
                encryption_key: None,
            },
            scheduler: SchedulerSettings {
                enabled: true,
                sweep_interval: Duration::from_secs(5 * 60),
            },
            embeddings: crate::embeddings::EmbeddingConfig::default(),
            auth: AuthConfig { default_user_id: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

/// CLI-supplied overrides, applied last. Flag parsing itself lives in
/// the binaries (`src/bin/mcp_server.rs`, `src/bin/cairn_cli.rs`); this
/// struct is just the seam they hand off to.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub repos_root: Option<String>,
    pub config_file: Option<String>,
}

impl AppConfig {
    /// Apply the precedence chain: defaults, then an optional TOML file,
    /// then environment variables, then CLI flags.
    pub fn load(cli_overrides: &CliOverrides) -> Result<Self> {
        let mut config = Self::default();

        let file_path = cli_overrides
            .config_file
            .clone()
            .or_else(|| std::env::var("CAIRN_CONFIG").ok());
        if let Some(path) = file_path {
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)?;
        }

        if let Ok(host) = std::env::var("CAIRN_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("CAIRN_SERVER_PORT") {
            config.server.port = port.parse()?;
        }
        if let Ok(repos_root) = std::env::var("CAIRN_REPOS_ROOT") {
            config.storage.repos_root = repos_root;
        }
        if let Ok(key) = std::env::var("CAIRN_ENCRYPTION_KEY") {
            config.storage.encryption_key = Some(key);
        }
        if let Ok(user_id) = std::env::var("CAIRN_DEFAULT_USER_ID") {
            config.auth.default_user_id = Some(user_id);
        }

        if let Some(host) = &cli_overrides.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli_overrides.port {
            config.server.port = port;
        }
        if let Some(repos_root) = &cli_overrides.repos_root {
            config.storage.repos_root = repos_root.clone();
        }

        Ok(config)
    }

    /// Repository directories are named `cairn-<user_id>` rather than the
    /// bare user id, so that `repos_root` can be shared with other
    /// applications' repos without collision.
    pub fn repo_path_for(&self, user_id: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.storage.repos_root).join(format!("cairn-{user_id}"))
    }
}

mod duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_suffix('s')
            .ok_or_else(|| serde::de::Error::custom("expected duration string ending with 's'"))?;
        let secs: u64 = stripped.parse().map_err(serde::de::Error::custom)?;
        Ok(Duration::from_secs(secs))
    }
}
