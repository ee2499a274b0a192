//! Configuration for the orchestrator core.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (`TASKLOOM_*`)
//! 3. Config file (`~/.config/taskloom/config.toml`, or `--config <path>`)
//! 4. Default values

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent::ExecutorType;
use crate::{Error, Result};

/// Desktop and webhook status notifications.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    pub desktop: bool,
    pub webhook: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            desktop: false,
            webhook: None,
        }
    }
}

/// HTTP dashboard bind address.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4173,
        }
    }
}

/// Root configuration structure, matching the TOML table in the
/// configuration reference.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Repository containing the plans tree.
    pub project_root: PathBuf,

    /// Root for per-task worktrees.
    pub worktree_dir: PathBuf,

    /// Supervisor concurrency bound.
    pub max_parallel_agents: u32,

    /// Persisted state location.
    pub database_path: PathBuf,

    /// Selects executor profile A or B.
    pub executor_type: ExecutorType,

    /// Model string passed to profile B.
    pub opencode_model: Option<String>,

    /// Optional coordinator URL; enables the build-pool MCP entry.
    pub build_pool_url: Option<String>,

    pub notifications: NotificationsConfig,

    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            worktree_dir: PathBuf::from(".taskloom/worktrees"),
            max_parallel_agents: 4,
            database_path: PathBuf::from(".taskloom/taskloom.db"),
            executor_type: ExecutorType::ProfileA,
            opencode_model: None,
            build_pool_url: None,
            notifications: NotificationsConfig::default(),
            web: WebConfig::default(),
        }
    }
}

/// CLI-level overrides, one field per flag that can shadow the config
/// file. All fields are optional; `None` leaves the resolved value as-is.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub project_root: Option<PathBuf>,
    pub worktree_dir: Option<PathBuf>,
    pub max_parallel_agents: Option<u32>,
    pub database_path: Option<PathBuf>,
}

impl Config {
    /// Load from the default config file location, or defaults if absent.
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a specific file, honoring `--config <path>`.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config at {}: {}", path.display(), e)))
    }

    /// `~/.config/taskloom/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("taskloom").join("config.toml"))
    }

    /// Apply `TASKLOOM_*` environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("TASKLOOM_PROJECT_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Ok(dir) = std::env::var("TASKLOOM_WORKTREE_DIR") {
            self.worktree_dir = PathBuf::from(dir);
        }
        if let Ok(n) = std::env::var("TASKLOOM_MAX_PARALLEL_AGENTS") {
            if let Ok(n) = n.parse() {
                self.max_parallel_agents = n;
            }
        }
        if let Ok(path) = std::env::var("TASKLOOM_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(model) = std::env::var("TASKLOOM_OPENCODE_MODEL") {
            self.opencode_model = Some(model);
        }
        if let Ok(url) = std::env::var("TASKLOOM_BUILD_POOL_URL") {
            self.build_pool_url = Some(url);
        }
        self
    }

    /// Apply CLI flag overrides. Highest priority in the resolution chain.
    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(root) = overrides.project_root {
            self.project_root = root;
        }
        if let Some(dir) = overrides.worktree_dir {
            self.worktree_dir = dir;
        }
        if let Some(n) = overrides.max_parallel_agents {
            self.max_parallel_agents = n;
        }
        if let Some(path) = overrides.database_path {
            self.database_path = path;
        }
        self
    }

    /// Priority: CLI > env > config file > defaults. `config_path`, when
    /// given, overrides the default config file location (`--config`).
    pub fn load_with_overrides(config_path: Option<&PathBuf>, cli: CliOverrides) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        Ok(base.with_env_overrides().with_cli_overrides(cli))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.max_parallel_agents, 4);
        assert_eq!(config.executor_type, ExecutorType::ProfileA);
        assert!(config.opencode_model.is_none());
        assert!(!config.notifications.desktop);
        assert_eq!(config.web.port, 4173);
    }

    #[test]
    fn cli_overrides_take_priority() {
        let config = Config::default().with_cli_overrides(CliOverrides {
            max_parallel_agents: Some(8),
            database_path: Some(PathBuf::from("/tmp/custom.db")),
            ..Default::default()
        });
        assert_eq!(config.max_parallel_agents, 8);
        assert_eq!(config.database_path, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn parses_full_toml_table() {
        let toml = r#"
project_root = "/repo"
worktree_dir = "/repo/.worktrees"
max_parallel_agents = 6
database_path = "/var/taskloom/db.sqlite"
executor_type = "profile_b"
opencode_model = "gpt-5-codex"
build_pool_url = "https://pool.example.com"

[notifications]
desktop = true
webhook = "https://hooks.example.com/taskloom"

[web]
host = "0.0.0.0"
port = 9090
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.project_root, PathBuf::from("/repo"));
        assert_eq!(config.max_parallel_agents, 6);
        assert_eq!(config.executor_type, ExecutorType::ProfileB);
        assert_eq!(config.opencode_model, Some("gpt-5-codex".to_string()));
        assert_eq!(
            config.build_pool_url,
            Some("https://pool.example.com".to_string())
        );
        assert!(config.notifications.desktop);
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 9090);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml = r#"
max_parallel_agents = 2
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.max_parallel_agents, 2);
        assert_eq!(config.executor_type, ExecutorType::ProfileA);
        assert_eq!(config.web.port, WebConfig::default().port);
    }

    #[test]
    fn rejects_unknown_executor_type() {
        let toml = r#"executor_type = "profile_c""#;
        let result: std::result::Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn executor_type_accepts_hyphenated_and_short_forms() {
        let toml = r#"executor_type = "b""#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.executor_type, ExecutorType::ProfileB);
    }
}
