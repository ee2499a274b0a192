//! `group_priorities` table repository (spec §3 `GroupPriority` overrides).

use sqlx::SqlitePool;

use crate::schema::GroupPriorityRow;
use crate::{Error, Result};

pub struct GroupPriorityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GroupPriorityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set(&self, module: &str, tier: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_priorities (module, tier) VALUES (?, ?)
            ON CONFLICT(module) DO UPDATE SET tier = excluded.tier
            "#,
        )
        .bind(module)
        .bind(tier)
        .execute(self.pool)
        .await
        .map_err(Error::Sqlx)?;
        Ok(())
    }

    pub async fn unset(&self, module: &str) -> Result<()> {
        sqlx::query("DELETE FROM group_priorities WHERE module = ?")
            .bind(module)
            .execute(self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(())
    }

    /// Defaults to tier 0 when the module has no override row.
    pub async fn get(&self, module: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, GroupPriorityRow>(
            "SELECT * FROM group_priorities WHERE module = ?",
        )
        .bind(module)
        .fetch_optional(self.pool)
        .await
        .map_err(Error::Sqlx)?;
        Ok(row.map(|r| r.tier).unwrap_or(0))
    }

    pub async fn all(&self) -> Result<Vec<GroupPriorityRow>> {
        sqlx::query_as::<_, GroupPriorityRow>("SELECT * FROM group_priorities ORDER BY module")
            .fetch_all(self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn test_db() -> Database {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_path(dir.path().join("t.db")).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn get_defaults_to_zero() {
        let db = test_db().await;
        let repo = GroupPriorityRepository::new(db.pool());
        assert_eq!(repo.get("billing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_then_get_then_unset() {
        let db = test_db().await;
        let repo = GroupPriorityRepository::new(db.pool());
        repo.set("billing", 2).await.unwrap();
        assert_eq!(repo.get("billing").await.unwrap(), 2);
        repo.unset("billing").await.unwrap();
        assert_eq!(repo.get("billing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_is_idempotent_on_module() {
        let db = test_db().await;
        let repo = GroupPriorityRepository::new(db.pool());
        repo.set("billing", 1).await.unwrap();
        repo.set("billing", 3).await.unwrap();
        let all = repo.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].tier, 3);
    }
}
