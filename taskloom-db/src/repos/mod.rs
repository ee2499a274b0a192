//! Repository modules: one per table, a thin wrapper around `SqlitePool`
//! with raw `sqlx::query` + bind, following the teacher's
//! `repos/agents.rs` shape (manual row mapping, no query-builder crate).

pub mod agent_runs;
pub mod group_priorities;
pub mod tasks;

pub use agent_runs::AgentRunRepository;
pub use group_priorities::GroupPriorityRepository;
pub use tasks::TaskRepository;
