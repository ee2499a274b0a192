//! Error types for the orchestrator core

use thiserror::Error;

/// Result type alias for orchestrator core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for orchestrator core operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML frontmatter parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// git2 error
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Config errors: missing project_root, unparseable TOML, invalid cron.
    /// Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parser errors: bad YAML, unreadable file. Reported per file; the
    /// rest of the scan proceeds.
    #[error("Parser error: {0}")]
    Parser(String),

    /// Scheduling errors reserved for fatal cases; cyclic dependencies are
    /// not fatal (see scheduler::topological_sort) and are reported as a
    /// warning with the excluded task list instead of this variant.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Worktree errors: git failure during create/remove. Fatal to the
    /// admission of the task that needed the worktree.
    #[error("Worktree error: {0}")]
    Worktree(String),

    /// Supervisor errors: spawn failure, invalid task id during recovery,
    /// admission rejected, invalid state transition attempted.
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    /// Sync errors: hard failure writing back to markdown/README.
    #[error("Sync error: {0}")]
    Sync(String),

    /// Database error, only constructed when the `database` feature is on.
    #[error("Database error: {0}")]
    Database(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "database")]
impl From<taskloom_db::Error> for Error {
    fn from(e: taskloom_db::Error) -> Self {
        Error::Database(e.to_string())
    }
}
