//! Row types mirroring the `tasks`, `agent_runs`, and `group_priorities`
//! tables (spec §3 Persisted state layout). This crate has no dependency
//! on `taskloom-core`'s domain types — it stays a thin row-mapping layer;
//! the CLI binary owns the conversion to/from `taskloom_core::Task` etc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `tasks` table. `depends_on` and `test_summary` are
/// stored as JSON text and (de)serialized at the repository boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRow {
    pub module: String,
    pub prefix: String,
    pub epic_num: i64,
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub depends_on: String,
    pub needs_review: bool,
    pub test_summary: Option<String>,
    pub github_issue: Option<i64>,
    pub source_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the `agent_runs` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentRunRow {
    pub id: String,
    pub task_id: String,
    pub worktree_path: String,
    pub log_path: String,
    pub pid: Option<i64>,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub session_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

/// One row of the `group_priorities` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupPriorityRow {
    pub module: String,
    pub tier: i64,
}

/// `agent_runs.status` values, matching spec §3 `AgentRun.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Stuck,
}

impl AgentRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRunStatus::Queued => "queued",
            AgentRunStatus::Running => "running",
            AgentRunStatus::Completed => "completed",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::Stuck => "stuck",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => AgentRunStatus::Running,
            "completed" => AgentRunStatus::Completed,
            "failed" => AgentRunStatus::Failed,
            "stuck" => AgentRunStatus::Stuck,
            _ => AgentRunStatus::Queued,
        }
    }

    /// Non-terminal statuses: what the recovery pass scans for on startup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentRunStatus::Completed | AgentRunStatus::Failed)
    }
}
