//! Agent supervisor (spec §4.4): the central component. Owns a bounded
//! set of in-memory `Agent` objects keyed by `TaskId`, spawns/resumes/stops
//! their child processes, streams output, serializes writes to the store,
//! and recovers in-flight work on restart.
//!
//! Grounded on the teacher's `agent/spawn.rs` (`AgentHandle` construction),
//! `agent/output.rs` (`StreamMessage`/`StreamHandler`/`OutputStreamer`
//! line-by-line merge), `agent/backend.rs` (`Backend` trait, dual-profile
//! registry reused directly for executor Profile A/B), and a
//! `workflow/state.rs`-style transition-table shape for the state machine.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::agent::{
    Backend, ErrorClass, ErrorEnvelope, ExecutorType, OutputStreamer, SpawnRequest, StreamHandler, Usage,
};
use crate::mcp::{self, McpOptions};
use crate::task::TaskId;
use crate::{Error, Result};

/// UUIDv5 namespace all session IDs are derived under. A fixed constant so
/// the same task always maps to the same session name across restarts.
pub const SESSION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x61, 0x73, 0x6b, 0x6c, 0x6f, 0x6f, 0x6d, 0x2d, 0x73, 0x65, 0x73, 0x73, 0x69, 0x6f, 0x6e,
]);

/// Deterministic session ID for `task_id`: a pure function, so two runs of
/// the system produce identical session IDs for the same task.
pub fn session_id_for(task_id: &TaskId) -> Uuid {
    Uuid::new_v5(&SESSION_NAMESPACE, task_id.to_string().as_bytes())
}

/// Agent lifecycle state (spec §4.4 state machine). `Stuck` is a
/// diagnostic overlay computed separately (see `StuckObserver`) and is
/// never a value of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Accumulated token/cost usage, updated from the terminal `result`
/// envelope when present.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// One historical/live record of a child-process execution for one task
/// (spec §3 `AgentRun`), as tracked by the supervisor's in-memory map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub task_id: TaskId,
    pub worktree_path: PathBuf,
    pub log_path: PathBuf,
    pub pid: Option<u32>,
    pub status: AgentStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub session_id: Uuid,
    pub usage: UsageTotals,
}

impl AgentRun {
    fn new(task_id: TaskId, worktree_path: PathBuf, log_path: PathBuf) -> Self {
        let session_id = session_id_for(&task_id);
        Self {
            id: String::new(),
            task_id,
            worktree_path,
            log_path,
            pid: None,
            status: AgentStatus::Queued,
            started_at: None,
            finished_at: None,
            error_message: None,
            session_id,
            usage: UsageTotals::default(),
        }
    }
}

const RING_CAPACITY: usize = 500;

/// In-memory agent handle: the live record plus a bounded ring of recent
/// output lines and the cancellation flag checked by its output task.
struct Agent {
    run: AgentRun,
    output_ring: Vec<String>,
    cancel: Arc<AtomicBool>,
    prompt: String,
}

impl Agent {
    fn push_line(&mut self, line: String) {
        if self.output_ring.len() >= RING_CAPACITY {
            self.output_ring.remove(0);
        }
        self.output_ring.push(line);
    }
}

/// One operation applied by the single serialized store writer.
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertAgentRun(AgentRun),
    /// `completed -> complete` or `running -> in_progress` status pushes,
    /// per the callback contract; other transitions never produce this.
    UpdateTaskStatus(TaskId, crate::task::Status),
    /// A non-terminal row whose `task_id` does not parse (recovery pass,
    /// spec §4.4): marked failed by its opaque run id since no `TaskId`
    /// (and therefore no in-memory `Agent`) can be constructed for it.
    MarkRunFailedById(String, String),
}

/// One non-terminal `agent_runs` row as read back at startup, decoupled
/// from `taskloom-db`'s row type so this crate stays free of a hard
/// dependency on it (spec §4.4 Recovery).
#[derive(Debug, Clone)]
pub struct RecoveredRow {
    pub id: String,
    pub task_id: String,
    pub worktree_path: PathBuf,
    pub log_path: PathBuf,
    pub pid: Option<u32>,
    pub session_id: Option<Uuid>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The store side of serialized writes. Implemented by a `taskloom-db`
/// adapter in the CLI binary; an in-memory implementation is provided for
/// tests.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    async fn apply(&self, op: WriteOp) -> Result<()>;
}

/// Records every applied `WriteOp` in arrival order; used by tests and as
/// a reference implementation.
#[derive(Default)]
pub struct MemoryWriter {
    pub ops: Mutex<Vec<WriteOp>>,
}

#[async_trait]
impl StoreWriter for MemoryWriter {
    async fn apply(&self, op: WriteOp) -> Result<()> {
        self.ops.lock().await.push(op);
        Ok(())
    }
}

/// Fired on every state transition: `(agent run snapshot, new status, error
/// message)`. Modeled as a first-class function value rather than a
/// listener tree, per the design note (spec §9) — pass it in at
/// construction, never back-reference the supervisor from inside it.
pub type StatusCallback = Arc<dyn Fn(&AgentRun, AgentStatus, Option<&str>) + Send + Sync>;

/// The supervisor: admission control, `Start`/`Resume`/`Stop`, output
/// streaming, and the serialized write pipeline.
pub struct Supervisor {
    backend: Arc<dyn Backend>,
    agents: Arc<Mutex<HashMap<TaskId, Agent>>>,
    max_concurrent: u32,
    writer_tx: mpsc::Sender<WriteOp>,
    writer: Arc<dyn StoreWriter>,
    callback: StatusCallback,
    mcp: Option<McpOptions>,
}

impl Supervisor {
    /// `writer_buffer` bounds the serialized-write channel; once full,
    /// writes fall back to a synchronous call against `writer` so progress
    /// never blocks on an unbounded queue.
    pub fn new(
        backend: Arc<dyn Backend>,
        writer: Arc<dyn StoreWriter>,
        max_concurrent: u32,
        writer_buffer: usize,
        callback: StatusCallback,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteOp>(writer_buffer);
        let writer_for_task = writer.clone();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                if let Err(e) = writer_for_task.apply(op).await {
                    tracing::warn!("serialized store write failed: {}", e);
                }
            }
        });

        Self {
            backend,
            agents: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent,
            writer_tx: tx,
            writer,
            callback,
            mcp: None,
        }
    }

    /// Enable MCP config generation for `Start`/`Resume` (spec §6 "MCP
    /// configuration generation"). Without this, agents spawn with no MCP
    /// config at all.
    pub fn with_mcp_options(mut self, mcp: McpOptions) -> Self {
        self.mcp = Some(mcp);
        self
    }

    /// `CanStart`: true iff fewer than `max_concurrent` agents are running.
    pub async fn can_start(&self) -> bool {
        let agents = self.agents.lock().await;
        let running = agents.values().filter(|a| a.run.status == AgentStatus::Running).count();
        (running as u32) < self.max_concurrent
    }

    /// Resolve the MCP config for one spawn, per `self.mcp` (if set) and
    /// the target executor profile.
    fn build_mcp(&self, worktree_path: &Path) -> Result<(Option<String>, Option<(&'static str, PathBuf)>)> {
        let Some(opts) = &self.mcp else {
            return Ok((None, None));
        };
        match opts.executor_type {
            ExecutorType::ProfileA => {
                let inline = mcp::inline_config_for_profile_a(&opts.project_root, opts.build_pool_url.as_deref())?;
                Ok((inline, None))
            }
            ExecutorType::ProfileB => {
                let env_pair =
                    mcp::write_profile_b_config(worktree_path, &opts.project_root, opts.build_pool_url.as_deref())?;
                Ok((None, env_pair))
            }
        }
    }

    async fn enqueue_write(&self, op: WriteOp) {
        if let Err(mpsc::error::TrySendError::Full(op)) = self.writer_tx.try_send(op) {
            if let Err(e) = self.writer.apply(op).await {
                tracing::warn!("synchronous store write fallback failed: {}", e);
            }
        }
    }

    fn fire_callback(&self, run: &AgentRun, status: AgentStatus, error: Option<&str>) {
        (self.callback)(run, status, error);
    }

    /// Register a task for admission without starting it (state `queued`).
    pub async fn enqueue(&self, task_id: TaskId, worktree_path: PathBuf) {
        let log_path = worktree_path.join(".agent.log");
        let run = AgentRun::new(task_id.clone(), worktree_path, log_path);
        let mut agents = self.agents.lock().await;
        agents.insert(
            task_id,
            Agent {
                run,
                output_ring: Vec::new(),
                cancel: Arc::new(AtomicBool::new(false)),
                prompt: String::new(),
            },
        );
    }

    /// `Start`: admit and spawn a queued task's agent.
    pub async fn start(&self, task_id: &TaskId, prompt: &str) -> Result<()> {
        if prompt.is_empty() {
            return Err(Error::Supervisor("prompt must not be empty".to_string()));
        }
        if !self.can_start().await {
            return Err(Error::Supervisor("admission rejected: max_parallel_agents reached".to_string()));
        }

        let (worktree_path, log_path, session_id) = {
            let mut agents = self.agents.lock().await;
            let agent = agents
                .get_mut(task_id)
                .ok_or_else(|| Error::Supervisor(format!("no queued agent for {}", task_id)))?;

            if agent.run.status != AgentStatus::Queued {
                return Err(Error::Supervisor(format!(
                    "cannot start {}: not in queued state",
                    task_id
                )));
            }

            agent.run.id = format!("{}-{}", task_id, chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());
            agent.prompt = prompt.to_string();
            (agent.run.worktree_path.clone(), agent.run.log_path.clone(), agent.run.session_id)
        };

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)
            .map_err(Error::Io)?;

        let (mcp_inline, mcp_env) = self.build_mcp(&worktree_path)?;
        let req = SpawnRequest {
            prompt,
            workdir: &worktree_path,
            session_id,
            resume: false,
            mcp_config_inline: mcp_inline.as_deref(),
            mcp_config_env: mcp_env.as_ref().map(|(var, path)| (*var, path.as_path())),
        };

        let spawn_result = self.backend.spawn(&req).await;

        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(task_id).expect("agent present");

        let mut handle = match spawn_result {
            Ok(h) => h,
            Err(e) => {
                agent.run.status = AgentStatus::Failed;
                agent.run.error_message = Some(e.to_string());
                self.fire_callback(&agent.run, AgentStatus::Failed, Some(&e.to_string()));
                let run = agent.run.clone();
                drop(agents);
                self.enqueue_write(WriteOp::UpsertAgentRun(run)).await;
                return Err(e);
            }
        };

        agent.run.pid = handle.child_mut().id();
        agent.run.started_at = Some(chrono::Utc::now());
        agent.run.status = AgentStatus::Running;
        agent.run.finished_at = None;
        agent.run.error_message = None;
        agent.output_ring.clear();
        agent.cancel.store(false, Ordering::SeqCst);

        self.fire_callback(&agent.run, AgentStatus::Running, None);
        let run_snapshot = agent.run.clone();
        let cancel = agent.cancel.clone();
        drop(agents);

        self.enqueue_write(WriteOp::UpsertAgentRun(run_snapshot)).await;
        self.enqueue_write(WriteOp::UpdateTaskStatus(task_id.clone(), crate::task::Status::InProgress))
            .await;

        let stdout = handle.take_stdout();
        let stderr = handle.take_stderr();
        self.spawn_run_task(task_id.clone(), handle, stdout, stderr, log_file, cancel);

        Ok(())
    }

    /// `Resume`: reject unless completed/failed; refuse if the in-worktree
    /// markdown already reports the task complete.
    pub async fn resume(&self, task_id: &TaskId, prompt: &str) -> Result<()> {
        let (worktree_path, log_path, session_id) = {
            let agents = self.agents.lock().await;
            let agent = agents
                .get(task_id)
                .ok_or_else(|| Error::Supervisor(format!("no agent record for {}", task_id)))?;
            if !matches!(agent.run.status, AgentStatus::Completed | AgentStatus::Failed) {
                return Err(Error::Supervisor(format!(
                    "cannot resume {}: not in a terminal state",
                    task_id
                )));
            }
            (agent.run.worktree_path.clone(), agent.run.log_path.clone(), agent.run.session_id)
        };

        if worktree_markdown_reports_complete(task_id, &worktree_path) {
            return Err(Error::Supervisor(format!(
                "{} is already complete in the worktree's markdown",
                task_id
            )));
        }

        let mut log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(Error::Io)?;
        writeln!(log_file, "--- resumed {} ---", chrono::Utc::now().to_rfc3339()).map_err(Error::Io)?;

        let (mcp_inline, mcp_env) = self.build_mcp(&worktree_path)?;
        let req = SpawnRequest {
            prompt,
            workdir: &worktree_path,
            session_id,
            resume: true,
            mcp_config_inline: mcp_inline.as_deref(),
            mcp_config_env: mcp_env.as_ref().map(|(var, path)| (*var, path.as_path())),
        };
        let mut handle = self.backend.spawn(&req).await?;

        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(task_id).expect("agent present");
        agent.run.pid = handle.child_mut().id();
        agent.run.status = AgentStatus::Running;
        agent.run.finished_at = None;
        agent.run.error_message = None;
        agent.output_ring.clear();
        agent.cancel.store(false, Ordering::SeqCst);
        agent.prompt = prompt.to_string();

        self.fire_callback(&agent.run, AgentStatus::Running, None);
        let run_snapshot = agent.run.clone();
        let cancel = agent.cancel.clone();
        drop(agents);

        self.enqueue_write(WriteOp::UpsertAgentRun(run_snapshot)).await;
        self.enqueue_write(WriteOp::UpdateTaskStatus(task_id.clone(), crate::task::Status::InProgress))
            .await;

        let stdout = handle.take_stdout();
        let stderr = handle.take_stderr();
        self.spawn_run_task(task_id.clone(), handle, stdout, stderr, log_file, cancel);

        Ok(())
    }

    /// `Stop`: cancel the agent's context. The run task observes this and
    /// reports failure with message "cancelled".
    pub async fn stop(&self, task_id: &TaskId) -> Result<()> {
        let agents = self.agents.lock().await;
        let agent = agents
            .get(task_id)
            .ok_or_else(|| Error::Supervisor(format!("no agent record for {}", task_id)))?;
        agent.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn snapshot(&self, task_id: &TaskId) -> Option<AgentRun> {
        self.agents.lock().await.get(task_id).map(|a| a.run.clone())
    }

    pub async fn recent_output(&self, task_id: &TaskId) -> Vec<String> {
        self.agents
            .lock()
            .await
            .get(task_id)
            .map(|a| a.output_ring.clone())
            .unwrap_or_default()
    }

    pub async fn running_count(&self) -> usize {
        self.agents
            .lock()
            .await
            .values()
            .filter(|a| a.run.status == AgentStatus::Running)
            .count()
    }

    /// Startup recovery pass (spec §4.4): reconcile non-terminal
    /// `agent_runs` rows against live OS processes. For each row:
    /// - an unparseable `task_id` is failed with "invalid task ID";
    /// - a live pid is re-attached (loaded into the in-memory map as
    ///   `running`, with output recovered from the log file's tail, and a
    ///   background task begins polling for its exit);
    /// - a dead pid is marked `completed` — a lossy policy choice (the
    ///   child may actually have failed) documented in spec §9 as
    ///   deliberately avoiding the alternative of guessing failure.
    ///
    /// Recovered agents become visible to callers of `snapshot`/
    /// `recent_output` and count against `max_concurrent` immediately.
    pub async fn recover(&self, rows: Vec<RecoveredRow>) -> Vec<(TaskId, AgentStatus)> {
        let mut outcomes = Vec::new();
        for row in rows {
            let Some(task_id) = TaskId::parse(&row.task_id) else {
                self.enqueue_write(WriteOp::MarkRunFailedById(row.id.clone(), "invalid task ID".to_string()))
                    .await;
                continue;
            };

            let alive = row.pid.map(process_is_alive).unwrap_or(false);
            let session_id = row.session_id.unwrap_or_else(|| session_id_for(&task_id));

            if alive {
                let output_ring = tail_log_lines(&row.log_path, RING_CAPACITY);
                let run = AgentRun {
                    id: row.id.clone(),
                    task_id: task_id.clone(),
                    worktree_path: row.worktree_path.clone(),
                    log_path: row.log_path.clone(),
                    pid: row.pid,
                    status: AgentStatus::Running,
                    started_at: row.started_at,
                    finished_at: None,
                    error_message: None,
                    session_id,
                    usage: UsageTotals::default(),
                };

                let cancel = Arc::new(AtomicBool::new(false));
                let mut agents = self.agents.lock().await;
                agents.insert(
                    task_id.clone(),
                    Agent {
                        run: run.clone(),
                        output_ring,
                        cancel: cancel.clone(),
                        prompt: String::new(),
                    },
                );
                drop(agents);

                self.spawn_recovery_watch(task_id.clone(), row.pid.unwrap(), cancel);
                outcomes.push((task_id, AgentStatus::Running));
            } else {
                tracing::warn!(
                    %task_id,
                    "recovery: pid not alive, recording as completed (lossy: the child may have failed)"
                );
                let output_ring = tail_log_lines(&row.log_path, RING_CAPACITY);
                let run = AgentRun {
                    id: row.id.clone(),
                    task_id: task_id.clone(),
                    worktree_path: row.worktree_path.clone(),
                    log_path: row.log_path.clone(),
                    pid: row.pid,
                    status: AgentStatus::Completed,
                    started_at: row.started_at,
                    finished_at: Some(chrono::Utc::now()),
                    error_message: None,
                    session_id,
                    usage: UsageTotals::default(),
                };

                let mut agents = self.agents.lock().await;
                agents.insert(
                    task_id.clone(),
                    Agent {
                        run: run.clone(),
                        output_ring,
                        cancel: Arc::new(AtomicBool::new(false)),
                        prompt: String::new(),
                    },
                );
                drop(agents);

                self.enqueue_write(WriteOp::UpsertAgentRun(run)).await;
                outcomes.push((task_id, AgentStatus::Completed));
            }
        }
        outcomes
    }

    /// Poll a re-attached pid until it exits (no `Child` handle exists for
    /// a recovered process, so we cannot `wait()` on it). On exit, scan the
    /// log tail for a typed error envelope the same way a live run does;
    /// absent one, default to `completed` per the recovery policy.
    fn spawn_recovery_watch(&self, task_id: TaskId, pid: u32, cancel: Arc<AtomicBool>) {
        let agents = self.agents.clone();
        let callback = self.callback.clone();
        let writer_tx = self.writer_tx.clone();
        let writer = self.writer.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                if cancel.load(Ordering::SeqCst) {
                    kill_pid(pid);
                    break;
                }
                if !process_is_alive(pid) {
                    break;
                }
            }

            let cancelled = cancel.load(Ordering::SeqCst);
            let mut agents = agents.lock().await;
            let Some(agent) = agents.get_mut(&task_id) else { return };
            if agent.run.status != AgentStatus::Running {
                return;
            }

            let (new_status, error_message) = if cancelled {
                (AgentStatus::Failed, Some("cancelled".to_string()))
            } else {
                match scan_log_tail_for_error(&agent.run.log_path) {
                    Some(message) => (AgentStatus::Failed, Some(message)),
                    None => (AgentStatus::Completed, None),
                }
            };

            agent.run.status = new_status;
            agent.run.finished_at = Some(chrono::Utc::now());
            agent.run.error_message = error_message.clone();
            callback(&agent.run, new_status, error_message.as_deref());
            let run_snapshot = agent.run.clone();
            let task_status = if new_status == AgentStatus::Completed {
                Some(crate::task::Status::Complete)
            } else {
                None
            };
            drop(agents);

            if writer_tx.try_send(WriteOp::UpsertAgentRun(run_snapshot.clone())).is_err() {
                let _ = writer.apply(WriteOp::UpsertAgentRun(run_snapshot)).await;
            }
            if let Some(status) = task_status {
                if writer_tx.try_send(WriteOp::UpdateTaskStatus(task_id.clone(), status)).is_err() {
                    let _ = writer.apply(WriteOp::UpdateTaskStatus(task_id, status)).await;
                }
            }
        });
    }

    fn spawn_run_task(
        &self,
        task_id: TaskId,
        mut handle: crate::agent::AgentHandle,
        stdout: Option<tokio::process::ChildStdout>,
        stderr: Option<tokio::process::ChildStderr>,
        log_file: std::fs::File,
        cancel: Arc<AtomicBool>,
    ) {
        let agents = self.agents.clone();
        let callback = self.callback.clone();
        let writer_tx = self.writer_tx.clone();
        let writer = self.writer.clone();

        tokio::spawn(async move {
            let ring = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
            let log_file = Arc::new(std::sync::Mutex::new(log_file));
            let usage = Arc::new(std::sync::Mutex::new(None::<Usage>));
            let cost = Arc::new(std::sync::Mutex::new(None::<f64>));
            let terminal_error = Arc::new(std::sync::Mutex::new(None::<(ErrorEnvelope, ErrorClass)>));

            let mut join_set = tokio::task::JoinSet::new();
            if let Some(out) = stdout {
                join_set.spawn(stream_one(
                    out,
                    ring.clone(),
                    log_file.clone(),
                    usage.clone(),
                    cost.clone(),
                    terminal_error.clone(),
                ));
            }
            if let Some(err) = stderr {
                join_set.spawn(stream_one(
                    err,
                    ring.clone(),
                    log_file.clone(),
                    usage.clone(),
                    cost.clone(),
                    terminal_error.clone(),
                ));
            }

            let wait_result = loop {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        if cancel.load(Ordering::SeqCst) {
                            let _ = handle.kill().await;
                            break Err(Error::Supervisor("cancelled".to_string()));
                        }
                    }
                    status = handle.wait() => {
                        break status.map_err(Error::Io);
                    }
                }
            };

            while join_set.join_next().await.is_some() {}

            let cancelled = cancel.load(Ordering::SeqCst);
            let (new_status, error_message) = match &wait_result {
                _ if cancelled => (AgentStatus::Failed, Some("cancelled".to_string())),
                Ok(status) if status.success() => (AgentStatus::Completed, None),
                Ok(_) => {
                    let term = terminal_error.lock().unwrap();
                    let message = term
                        .as_ref()
                        .and_then(|(env, _)| env.data.as_ref())
                        .and_then(|d| d.message.clone())
                        .unwrap_or_else(|| "child exited with non-zero status".to_string());
                    (AgentStatus::Failed, Some(message))
                }
                Err(e) => (AgentStatus::Failed, Some(e.to_string())),
            };

            let mut agents = agents.lock().await;
            if let Some(agent) = agents.get_mut(&task_id) {
                agent.run.status = new_status;
                agent.run.finished_at = Some(chrono::Utc::now());
                agent.run.error_message = error_message.clone();
                if let Some(u) = usage.lock().unwrap().as_ref() {
                    agent.run.usage.input_tokens = u.input_tokens;
                    agent.run.usage.output_tokens = u.output_tokens;
                }
                if let Some(c) = *cost.lock().unwrap() {
                    agent.run.usage.cost_usd = c;
                }
                agent.output_ring = ring.lock().unwrap().clone();

                callback(&agent.run, new_status, error_message.as_deref());
                let run_snapshot = agent.run.clone();
                let task_status = if new_status == AgentStatus::Completed {
                    Some(crate::task::Status::Complete)
                } else {
                    None
                };
                drop(agents);

                if writer_tx.try_send(WriteOp::UpsertAgentRun(run_snapshot.clone())).is_err() {
                    let _ = writer.apply(WriteOp::UpsertAgentRun(run_snapshot)).await;
                }
                if let Some(status) = task_status {
                    if writer_tx.try_send(WriteOp::UpdateTaskStatus(task_id.clone(), status)).is_err() {
                        let _ = writer.apply(WriteOp::UpdateTaskStatus(task_id, status)).await;
                    }
                }
            }
        });
    }
}

/// Line-by-line stream handler that appends to the shared ring and the
/// fsync'd log file, and tracks usage/cost and the terminal error
/// envelope if one arrives on this stream. The supervisor must not assume
/// which of stdout/stderr carries the terminal envelope, so this handler
/// is instantiated once per stream and the two streams race independently.
struct RingLogHandler {
    ring: Arc<std::sync::Mutex<Vec<String>>>,
    log_file: Arc<std::sync::Mutex<std::fs::File>>,
    usage: Arc<std::sync::Mutex<Option<Usage>>>,
    cost: Arc<std::sync::Mutex<Option<f64>>>,
    terminal_error: Arc<std::sync::Mutex<Option<(ErrorEnvelope, ErrorClass)>>>,
}

impl StreamHandler for RingLogHandler {
    fn on_assistant_text(&mut self, text: &str) {
        self.record_line(text);
    }

    fn on_complete(&mut self, _session_id: Option<&str>, usage: Option<&Usage>, cost_usd: Option<f64>) {
        if let Some(u) = usage {
            *self.usage.lock().unwrap() = Some(u.clone());
        }
        if let Some(c) = cost_usd {
            *self.cost.lock().unwrap() = Some(c);
        }
    }

    fn on_error(&mut self, envelope: &ErrorEnvelope, class: ErrorClass) {
        *self.terminal_error.lock().unwrap() = Some((envelope.clone(), class));
    }

    fn on_unrecognized_line(&mut self, line: &str) {
        self.record_line(line);
    }
}

impl RingLogHandler {
    /// Appends synchronously: each call happens inline with the line
    /// being read, so ordering within this stream is exactly the order
    /// the child wrote it (merged stdout/stderr ordering is explicitly
    /// unspecified per spec §5, but within one stream it is preserved).
    fn record_line(&self, line: &str) {
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= RING_CAPACITY {
                ring.remove(0);
            }
            ring.push(line.to_string());
        }
        let mut f = self.log_file.lock().unwrap();
        let _ = f.write_all(line.as_bytes());
        let _ = f.write_all(b"\n");
        let _ = f.flush();
        let _ = f.sync_all();
    }
}

async fn stream_one<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    reader: R,
    ring: Arc<std::sync::Mutex<Vec<String>>>,
    log_file: Arc<std::sync::Mutex<std::fs::File>>,
    usage: Arc<std::sync::Mutex<Option<Usage>>>,
    cost: Arc<std::sync::Mutex<Option<f64>>>,
    terminal_error: Arc<std::sync::Mutex<Option<(ErrorEnvelope, ErrorClass)>>>,
) {
    let mut handler = RingLogHandler {
        ring,
        log_file,
        usage,
        cost,
        terminal_error,
    };
    let mut streamer = OutputStreamer::new(reader);
    let _ = streamer.stream(&mut handler).await;
}

/// Diagnostic overlay: a "has been running longer than T" predicate
/// against `started_at`. Observed, not enforced — it never transitions
/// state, just flags the `--stuck` view for the dashboard/CLI.
pub fn is_stuck(run: &AgentRun, threshold: std::time::Duration, now: chrono::DateTime<chrono::Utc>) -> bool {
    run.status == AgentStatus::Running
        && run
            .started_at
            .map(|started| {
                now.signed_duration_since(started)
                    .to_std()
                    .map(|elapsed| elapsed > threshold)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
}

/// Probe whether `pid` still refers to a live process ("a null signal",
/// spec.md §4.4). Three-platform split, no OS-specific dependency needed
/// for any one of them.
pub fn process_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("tasklist")
            .arg("/FI")
            .arg(format!("PID eq {}", pid))
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        true
    }
}

/// Best-effort request that `pid` terminate, used when stopping a
/// recovered agent for which no `Child` handle exists.
fn kill_pid(pid: u32) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill").arg("-TERM").arg(pid.to_string()).status();
    }
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .arg("/F")
            .status();
    }
}

/// Load up to `limit` trailing lines from a log file, for recovery output
/// re-attachment (spec §4.4: "load recent output from ... the
/// orchestrator's log file"). Missing files yield an empty ring.
fn tail_log_lines(log_path: &Path, limit: usize) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return Vec::new();
    };
    let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].to_vec()
}

/// Scan the last ~20 lines of the log for a typed `error` envelope (spec
/// §4.4 step 7), mirroring the live-run finalize path for a recovered
/// process that turns out to have exited.
fn scan_log_tail_for_error(log_path: &Path) -> Option<String> {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return None;
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(20);
    for line in lines[start..].iter().rev() {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(line) {
            if let Some(message) = envelope.data.and_then(|d| d.message) {
                return Some(message);
            }
        }
    }
    None
}

fn worktree_markdown_reports_complete(task_id: &TaskId, worktree_path: &Path) -> bool {
    let plans_root = worktree_path.join("docs").join("plans").join(&task_id.module);
    let Ok(entries) = std::fs::read_dir(&plans_root) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if crate::parser::extract_task_id_from_path(&path) == Some(task_id.clone()) {
            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(task) = crate::parser::parse_task(&path, &content) {
                    return task.status == crate::task::Status::Complete;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_recorder() -> (StatusCallback, Arc<Mutex<Vec<AgentStatus>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_cb = seen.clone();
        let cb: StatusCallback = Arc::new(move |_run, status, _err| {
            let seen = seen_for_cb.clone();
            let status = status;
            tokio::spawn(async move {
                seen.lock().await.push(status);
            });
        });
        (cb, seen)
    }

    #[test]
    fn session_id_is_a_pure_function_of_task_id() {
        let id = TaskId::new("billing", 1);
        assert_eq!(session_id_for(&id), session_id_for(&id));
        assert_ne!(session_id_for(&id), session_id_for(&TaskId::new("billing", 2)));
    }

    #[tokio::test]
    async fn can_start_respects_concurrency_limit() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer, 0, 16, cb);
        assert!(!sup.can_start().await);
    }

    #[tokio::test]
    async fn start_rejects_empty_prompt() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer, 4, 16, cb);
        let dir = tempfile::tempdir().unwrap();
        sup.enqueue(TaskId::new("billing", 0), dir.path().to_path_buf()).await;
        let err = sup.start(&TaskId::new("billing", 0), "").await.unwrap_err();
        assert!(matches!(err, Error::Supervisor(_)));
    }

    #[tokio::test]
    async fn start_rejects_unknown_task() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer, 4, 16, cb);
        let err = sup.start(&TaskId::new("billing", 0), "go").await.unwrap_err();
        assert!(matches!(err, Error::Supervisor(_)));
    }

    #[tokio::test]
    async fn resume_rejects_non_terminal_state() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer, 4, 16, cb);
        let dir = tempfile::tempdir().unwrap();
        sup.enqueue(TaskId::new("billing", 0), dir.path().to_path_buf()).await;
        let err = sup.resume(&TaskId::new("billing", 0), "go").await.unwrap_err();
        assert!(matches!(err, Error::Supervisor(_)));
    }

    #[test]
    fn is_stuck_requires_running_status_and_elapsed_threshold() {
        let mut run = AgentRun::new(TaskId::new("m", 0), PathBuf::new(), PathBuf::new());
        run.status = AgentStatus::Running;
        run.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(2));
        assert!(is_stuck(&run, std::time::Duration::from_secs(3600), chrono::Utc::now()));

        run.status = AgentStatus::Completed;
        assert!(!is_stuck(&run, std::time::Duration::from_secs(3600), chrono::Utc::now()));
    }

    #[tokio::test]
    async fn recover_fails_rows_with_unparseable_task_ids() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer.clone(), 4, 16, cb);

        let outcomes = sup
            .recover(vec![RecoveredRow {
                id: "run-1".to_string(),
                task_id: "not-a-task-id".to_string(),
                worktree_path: PathBuf::new(),
                log_path: PathBuf::new(),
                pid: None,
                session_id: None,
                started_at: None,
            }])
            .await;
        assert!(outcomes.is_empty());

        // give the async write channel a tick to drain
        tokio::task::yield_now().await;
        let ops = writer.ops.lock().await;
        assert!(matches!(ops.last(), Some(WriteOp::MarkRunFailedById(id, msg)) if id == "run-1" && msg == "invalid task ID"));
    }

    #[tokio::test]
    async fn recover_marks_dead_pid_completed() {
        let (cb, _seen) = callback_recorder();
        let writer = Arc::new(MemoryWriter::default());
        let backend: Arc<dyn Backend> = Arc::new(crate::agent::ProfileABackend::new());
        let sup = Supervisor::new(backend, writer, 4, 16, cb);

        let task_id = TaskId::new("billing", 3);
        let outcomes = sup
            .recover(vec![RecoveredRow {
                id: "run-2".to_string(),
                task_id: task_id.to_string(),
                worktree_path: PathBuf::new(),
                log_path: PathBuf::new(),
                // pid 0 is never alive (process_is_alive short-circuits it)
                pid: Some(0),
                session_id: None,
                started_at: None,
            }])
            .await;

        assert_eq!(outcomes, vec![(task_id.clone(), AgentStatus::Completed)]);
        let snap = sup.snapshot(&task_id).await.unwrap();
        assert_eq!(snap.status, AgentStatus::Completed);
        assert_eq!(snap.session_id, session_id_for(&task_id));
    }
}
