//! Bridges `taskloom-core`'s domain types to the `taskloom-db` row types,
//! and implements `StoreWriter` against a live `Database` connection.
//!
//! The sync engine's `TaskStore` trait is synchronous (it's meant to be
//! implementable in-memory for tests), while `sqlx` queries are async.
//! Rather than block-on the async pool from inside a sync trait impl,
//! callers load the full task table into a `MemoryStore` up front, run
//! the sync algorithms against that, and write back only what changed.

use std::sync::Arc;

use async_trait::async_trait;
use taskloom_core::{AgentRun, AgentStatus, Priority, Status, Task, TaskId, TestSummary};
use taskloom_db::repos::{AgentRunRepository, GroupPriorityRepository, TaskRepository};
use taskloom_db::schema::{AgentRunRow, TaskRow};
use taskloom_db::Database;

pub fn task_to_row(task: &Task) -> anyhow::Result<TaskRow> {
    Ok(TaskRow {
        module: task.id.module.clone(),
        prefix: task.id.prefix.clone(),
        epic_num: task.id.epic as i64,
        task_id: task.id.to_string(),
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status.as_str().to_string(),
        priority: priority_to_str(task.priority).to_string(),
        depends_on: serde_json::to_string(&task.depends_on)?,
        needs_review: task.needs_review,
        test_summary: task
            .test_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        github_issue: task.github_issue,
        source_path: task.source_path.to_string_lossy().into_owned(),
        created_at: task.created_at,
        updated_at: task.updated_at,
    })
}

pub fn row_to_task(row: &TaskRow) -> anyhow::Result<Task> {
    let depends_on: Vec<TaskId> = serde_json::from_str(&row.depends_on)?;
    let test_summary: Option<TestSummary> = row
        .test_summary
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(Task {
        id: TaskId::with_prefix(row.module.clone(), row.prefix.clone(), row.epic_num as u32),
        title: row.title.clone(),
        description: row.description.clone(),
        status: Status::normalize(&row.status),
        priority: priority_from_str(&row.priority),
        depends_on,
        needs_review: row.needs_review,
        test_summary,
        github_issue: row.github_issue,
        source_path: row.source_path.clone().into(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn priority_to_str(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

fn priority_from_str(raw: &str) -> Priority {
    match raw {
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Normal,
    }
}

fn agent_status_to_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Queued => "queued",
        AgentStatus::Running => "running",
        AgentStatus::Completed => "completed",
        AgentStatus::Failed => "failed",
    }
}

pub fn agent_run_to_row(run: &AgentRun) -> AgentRunRow {
    AgentRunRow {
        id: run.id.clone(),
        task_id: run.task_id.to_string(),
        worktree_path: run.worktree_path.to_string_lossy().into_owned(),
        log_path: run.log_path.to_string_lossy().into_owned(),
        pid: run.pid.map(|p| p as i64),
        status: agent_status_to_str(run.status).to_string(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        error_message: run.error_message.clone(),
        session_id: run.session_id.to_string(),
        input_tokens: run.usage.input_tokens as i64,
        output_tokens: run.usage.output_tokens as i64,
        cost_usd: run.usage.cost_usd,
    }
}

/// Convert a non-terminal `agent_runs` row into the form the supervisor's
/// recovery pass expects (spec §4.4). Unparseable sessions fall back to
/// `None`; `Supervisor::recover` derives the deterministic session ID from
/// the (parsed) task ID in that case.
pub fn row_to_recovered(row: &AgentRunRow) -> taskloom_core::RecoveredRow {
    taskloom_core::RecoveredRow {
        id: row.id.clone(),
        task_id: row.task_id.clone(),
        worktree_path: row.worktree_path.clone().into(),
        log_path: row.log_path.clone().into(),
        pid: row.pid.map(|p| p as u32),
        session_id: uuid::Uuid::parse_str(&row.session_id).ok(),
        started_at: row.started_at,
    }
}

/// Load every task row from the database, converted to domain `Task`s.
pub async fn load_all_tasks(db: &Database) -> anyhow::Result<Vec<Task>> {
    let rows = TaskRepository::new(db.pool()).all().await?;
    rows.iter().map(row_to_task).collect()
}

/// `StoreWriter` adapter used by `Supervisor`: applies each serialized
/// write directly against the `tasks`/`agent_runs` tables.
pub struct DbWriter {
    db: Arc<Database>,
}

impl DbWriter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl taskloom_core::StoreWriter for DbWriter {
    async fn apply(&self, op: taskloom_core::supervisor::WriteOp) -> taskloom_core::Result<()> {
        use taskloom_core::supervisor::WriteOp;
        match op {
            WriteOp::UpsertAgentRun(run) => {
                let repo = AgentRunRepository::new(self.db.pool());
                repo.upsert(&agent_run_to_row(&run))
                    .await
                    .map_err(taskloom_core::Error::from)
            }
            WriteOp::UpdateTaskStatus(task_id, status) => {
                let repo = TaskRepository::new(self.db.pool());
                if let Some(mut row) = repo
                    .get_by_task_id(&task_id.to_string())
                    .await
                    .map_err(taskloom_core::Error::from)?
                {
                    row.status = status.as_str().to_string();
                    row.updated_at = chrono::Utc::now();
                    repo.upsert(&row).await.map_err(taskloom_core::Error::from)?;
                }
                Ok(())
            }
            WriteOp::MarkRunFailedById(id, message) => {
                let repo = AgentRunRepository::new(self.db.pool());
                if let Some(mut row) = repo.get(&id).await.map_err(taskloom_core::Error::from)? {
                    row.status = "failed".to_string();
                    row.error_message = Some(message);
                    row.finished_at = Some(chrono::Utc::now());
                    repo.upsert(&row).await.map_err(taskloom_core::Error::from)?;
                }
                Ok(())
            }
        }
    }
}

pub async fn group_priority_repo(db: &Database) -> GroupPriorityRepository<'_> {
    GroupPriorityRepository::new(db.pool())
}
