//! SQLite persistence for the taskloom orchestrator.
//!
//! Stores the reconciled view of parsed tasks, agent run history, and
//! per-module priority overrides (spec §3 Persisted state). This crate
//! only maps rows to/from plain structs in [`schema`]; it has no
//! dependency on `taskloom-core`'s domain types, so the CLI binary owns
//! translating between `taskloom_core::Task` and [`schema::TaskRow`]
//! (and similarly for `AgentRun` / `GroupPriority`).

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

pub mod error;
pub mod repos;
pub mod schema;

pub use error::{Error, Result};

/// Database connection pool and configuration.
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open the database at the default location
    /// (`$XDG_CACHE_HOME/taskloom/taskloom.db`, or the platform
    /// equivalent), creating it if missing.
    pub async fn new() -> Result<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Open the database at a specific path, creating it and its parent
    /// directory if missing.
    pub async fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
        }

        tracing::info!(?path, "opening database");

        let options = SqliteConnectOptions::from_str(
            path.to_str()
                .ok_or_else(|| Error::Io("invalid UTF-8 in database path".to_string()))?,
        )
        .map_err(Error::Sqlx)?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(Error::Sqlx)?;

        Ok(Self { pool, path })
    }

    /// Run pending migrations embedded in `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Default database path, consistent with `taskloom_core::config`'s
    /// default `database_path` of `.taskloom/taskloom.db` under the
    /// project root: this is the fallback used when no project-local
    /// path is configured.
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Io("could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("taskloom").join("taskloom.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_and_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("taskloom_test.db");

        let db = Database::with_path(db_path.clone()).await.unwrap();
        assert_eq!(db.path(), &db_path);
    }

    #[tokio::test]
    async fn migrate_creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("taskloom_test_migrations.db");

        let db = Database::with_path(db_path).await.unwrap();
        db.migrate().await.unwrap();

        let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(db.pool())
            .await
            .unwrap();

        assert!(!result.is_empty());
    }
}
