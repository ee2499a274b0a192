//! taskloom-core - core library for the taskloom task orchestrator.
//!
//! This crate owns the domain model and algorithms shared by the CLI and
//! database crates: the markdown task graph, the scheduler, worktree and
//! git primitives, the agent supervisor, the two-way sync engine, the plan
//! watcher, and the cron-based batch driver. It has no knowledge of how
//! it's invoked (CLI, daemon, tests) and does not talk to SQLite directly;
//! `taskloom-db` is an optional dependency behind the `database` feature,
//! wired in only for the `From<taskloom_db::Error>` conversion in
//! [`error::Error`].

pub mod agent;
pub mod batch;
pub mod config;
pub mod error;
pub mod git;
pub mod mcp;
pub mod parser;
pub mod scheduler;
pub mod supervisor;
pub mod sync;
pub mod task;
pub mod watcher;
pub mod worktree;

pub use agent::{
    AssistantMessage, Backend, BackendRegistry, ErrorClass, ErrorEnvelope, ExecutorType,
    OutputStreamer, PrintHandler, ProfileABackend, ProfileBBackend, SpawnRequest, StreamHandler,
    StreamMessage, Usage,
};
pub use batch::{BatchConfig, BatchDriver, DispatchPlan};
pub use config::{CliOverrides, Config, NotificationsConfig, WebConfig};
pub use error::{Error, Result};
pub use git::{
    BranchingOptions, BranchingPoint, GitRepo, PushOutcome, RemoteInfo, WorktreeEntry, WorktreeInfo, WorktreeOptions,
};
pub use mcp::McpOptions;
pub use parser::{ParseFailure, ScanResult};
pub use scheduler::{active_tier, get_ready_tasks, get_ready_tasks_excluding, is_ready, topological_sort};
pub use supervisor::{
    AgentRun, AgentStatus, MemoryWriter, RecoveredRow, StatusCallback, StoreWriter, Supervisor, UsageTotals,
};
pub use sync::{Conflict, MemoryStore, Resolution, SyncReport, TaskStore};
pub use task::{GroupPriority, Priority, Status, Task, TaskId, TestSummary};
pub use watcher::{PlanChangeEvent, PlanWatcher};
pub use worktree::WorktreeManager;
