//! `tasks` table repository: indexed queries on (module, epic_num) and
//! status, per spec §3 Persisted state layout.

use sqlx::SqlitePool;

use crate::schema::TaskRow;
use crate::{Error, Result};

pub struct TaskRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TaskRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert keyed on the (module, prefix, epic_num) primary key.
    pub async fn upsert(&self, row: &TaskRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                module, prefix, epic_num, task_id, title, description, status,
                priority, depends_on, needs_review, test_summary, github_issue,
                source_path, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(module, prefix, epic_num) DO UPDATE SET
                task_id = excluded.task_id,
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                priority = excluded.priority,
                depends_on = excluded.depends_on,
                needs_review = excluded.needs_review,
                test_summary = excluded.test_summary,
                github_issue = excluded.github_issue,
                source_path = excluded.source_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.module)
        .bind(&row.prefix)
        .bind(row.epic_num)
        .bind(&row.task_id)
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.status)
        .bind(&row.priority)
        .bind(&row.depends_on)
        .bind(row.needs_review)
        .bind(&row.test_summary)
        .bind(row.github_issue)
        .bind(&row.source_path)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.pool)
        .await
        .map_err(Error::Sqlx)?;
        Ok(())
    }

    pub async fn get(&self, module: &str, prefix: &str, epic_num: i64) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE module = ? AND prefix = ? AND epic_num = ?",
        )
        .bind(module)
        .bind(prefix)
        .bind(epic_num)
        .fetch_optional(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn get_by_task_id(&self, task_id: &str) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    pub async fn all(&self) -> Result<Vec<TaskRow>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks ORDER BY module, prefix, epic_num")
            .fetch_all(self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    pub async fn find_by_module(&self, module: &str) -> Result<Vec<TaskRow>> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE module = ? ORDER BY prefix, epic_num",
        )
        .bind(module)
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn find_by_status(&self, status: &str) -> Result<Vec<TaskRow>> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = ? ORDER BY module, prefix, epic_num",
        )
        .bind(status)
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn delete(&self, module: &str, prefix: &str, epic_num: i64) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE module = ? AND prefix = ? AND epic_num = ?")
            .bind(module)
            .bind(prefix)
            .bind(epic_num)
            .execute(self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn row(module: &str, epic: i64, status: &str) -> TaskRow {
        let now = chrono::Utc::now();
        TaskRow {
            module: module.to_string(),
            prefix: String::new(),
            epic_num: epic,
            task_id: format!("{}/E{:02}", module, epic),
            title: "t".to_string(),
            description: String::new(),
            status: status.to_string(),
            priority: "normal".to_string(),
            depends_on: "[]".to_string(),
            needs_review: false,
            test_summary: None,
            github_issue: None,
            source_path: "/tmp/x.md".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn test_db() -> Database {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_path(dir.path().join("t.db")).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let db = test_db().await;
        let repo = TaskRepository::new(db.pool());
        repo.upsert(&row("billing", 0, "not_started")).await.unwrap();
        let fetched = repo.get("billing", "", 0).await.unwrap().unwrap();
        assert_eq!(fetched.status, "not_started");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_primary_key() {
        let db = test_db().await;
        let repo = TaskRepository::new(db.pool());
        repo.upsert(&row("billing", 0, "not_started")).await.unwrap();
        repo.upsert(&row("billing", 0, "complete")).await.unwrap();
        assert_eq!(repo.all().await.unwrap().len(), 1);
        assert_eq!(repo.get("billing", "", 0).await.unwrap().unwrap().status, "complete");
    }

    #[tokio::test]
    async fn find_by_status_filters() {
        let db = test_db().await;
        let repo = TaskRepository::new(db.pool());
        repo.upsert(&row("billing", 0, "complete")).await.unwrap();
        repo.upsert(&row("billing", 1, "not_started")).await.unwrap();
        let complete = repo.find_by_status("complete").await.unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].task_id, "billing/E00");
    }
}
