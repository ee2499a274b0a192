//! `agent_runs` table repository (spec §3 `AgentRun`, §4.4 recovery pass).

use sqlx::SqlitePool;

use crate::schema::AgentRunRow;
use crate::{Error, Result};

pub struct AgentRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AgentRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, row: &AgentRunRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_runs (
                id, task_id, worktree_path, log_path, pid, status, started_at,
                finished_at, error_message, session_id, input_tokens,
                output_tokens, cost_usd
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                task_id = excluded.task_id,
                worktree_path = excluded.worktree_path,
                log_path = excluded.log_path,
                pid = excluded.pid,
                status = excluded.status,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                error_message = excluded.error_message,
                session_id = excluded.session_id,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cost_usd = excluded.cost_usd
            "#,
        )
        .bind(&row.id)
        .bind(&row.task_id)
        .bind(&row.worktree_path)
        .bind(&row.log_path)
        .bind(row.pid)
        .bind(&row.status)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(&row.error_message)
        .bind(&row.session_id)
        .bind(row.input_tokens)
        .bind(row.output_tokens)
        .bind(row.cost_usd)
        .execute(self.pool)
        .await
        .map_err(Error::Sqlx)?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>("SELECT * FROM agent_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    /// At most one row per `task_id` should come back in {queued, running}
    /// (spec §3 AgentRun invariant); this query surfaces violations rather
    /// than hiding them.
    pub async fn find_active_for_task(&self, task_id: &str) -> Result<Vec<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>(
            "SELECT * FROM agent_runs WHERE task_id = ? AND status IN ('queued', 'running')",
        )
        .bind(task_id)
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn find_running(&self) -> Result<Vec<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>("SELECT * FROM agent_runs WHERE status = 'running'")
            .fetch_all(self.pool)
            .await
            .map_err(Error::Sqlx)
    }

    /// Non-terminal rows (`queued`, `running`, `stuck`): the set the
    /// supervisor's startup recovery pass reconciles against live OS
    /// processes.
    pub async fn find_non_terminal(&self) -> Result<Vec<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>(
            "SELECT * FROM agent_runs WHERE status IN ('queued', 'running', 'stuck')",
        )
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn find_by_task(&self, task_id: &str, limit: i64) -> Result<Vec<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>(
            "SELECT * FROM agent_runs WHERE task_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }

    pub async fn find_recent(&self, limit: i64) -> Result<Vec<AgentRunRow>> {
        sqlx::query_as::<_, AgentRunRow>(
            "SELECT * FROM agent_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(Error::Sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn row(id: &str, task_id: &str, status: &str) -> AgentRunRow {
        AgentRunRow {
            id: id.to_string(),
            task_id: task_id.to_string(),
            worktree_path: "/tmp/wt".to_string(),
            log_path: "/tmp/wt/.agent.log".to_string(),
            pid: Some(1234),
            status: status.to_string(),
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            error_message: None,
            session_id: "00000000-0000-0000-0000-000000000000".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        }
    }

    async fn test_db() -> Database {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_path(dir.path().join("t.db")).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn upsert_then_find_running() {
        let db = test_db().await;
        let repo = AgentRunRepository::new(db.pool());
        repo.upsert(&row("r1", "billing/E00", "running")).await.unwrap();
        repo.upsert(&row("r2", "billing/E01", "completed")).await.unwrap();
        let running = repo.find_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "r1");
    }

    #[tokio::test]
    async fn find_non_terminal_includes_queued_and_stuck() {
        let db = test_db().await;
        let repo = AgentRunRepository::new(db.pool());
        repo.upsert(&row("r1", "billing/E00", "queued")).await.unwrap();
        repo.upsert(&row("r2", "billing/E01", "stuck")).await.unwrap();
        repo.upsert(&row("r3", "billing/E02", "failed")).await.unwrap();
        let non_terminal = repo.find_non_terminal().await.unwrap();
        assert_eq!(non_terminal.len(), 2);
    }

    #[tokio::test]
    async fn upsert_updates_existing_row_by_id() {
        let db = test_db().await;
        let repo = AgentRunRepository::new(db.pool());
        repo.upsert(&row("r1", "billing/E00", "running")).await.unwrap();
        let mut updated = row("r1", "billing/E00", "completed");
        updated.finished_at = Some(chrono::Utc::now());
        repo.upsert(&updated).await.unwrap();
        let runs = repo.find_by_task("billing/E00", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
    }
}
