//! The task model: identifiers, status/priority enums, and the
//! dependency predicate that the rest of the orchestrator is built on.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task identifier: a module name, an optional uppercase subsystem
/// prefix, and an epic number. Canonical string form is `<module>/E<NN>`
/// with no prefix, or `<module>/<PREFIX><NN>` with one.
///
/// Total-ordered first by module, then prefix, then number. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub module: String,
    pub prefix: String,
    pub epic: u32,
}

impl TaskId {
    pub fn new(module: impl Into<String>, epic: u32) -> Self {
        Self {
            module: module.into(),
            prefix: String::new(),
            epic,
        }
    }

    pub fn with_prefix(module: impl Into<String>, prefix: impl Into<String>, epic: u32) -> Self {
        Self {
            module: module.into(),
            prefix: prefix.into(),
            epic,
        }
    }

    /// The implicit predecessor (M, N-1), if N > 0. Whether it actually
    /// exists in the task set is the caller's concern (see
    /// `Task::implicit_dependency`).
    pub fn predecessor(&self) -> Option<TaskId> {
        if self.epic == 0 {
            return None;
        }
        Some(TaskId {
            module: self.module.clone(),
            prefix: self.prefix.clone(),
            epic: self.epic - 1,
        })
    }

    /// Parse a canonical `<module>/E<NN>` or `<module>/<PREFIX><NN>` string.
    pub fn parse(s: &str) -> Option<TaskId> {
        let (module, rest) = s.split_once('/')?;
        if module.is_empty() {
            return None;
        }
        let digit_start = rest.find(|c: char| c.is_ascii_digit())?;
        let (prefix_part, num_part) = rest.split_at(digit_start);
        if num_part.is_empty() || !num_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let epic: u32 = num_part.parse().ok()?;
        let prefix = if prefix_part == "E" {
            String::new()
        } else {
            prefix_part.to_string()
        };
        Some(TaskId {
            module: module.to_string(),
            prefix,
            epic,
        })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.prefix.is_empty() {
            "E".to_string()
        } else {
            self.prefix.clone()
        };
        write!(f, "{}/{}{:02}", self.module, tag, self.epic)
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.module
            .cmp(&other.module)
            .then_with(|| self.prefix.cmp(&other.prefix))
            .then_with(|| self.epic.cmp(&other.epic))
    }
}

/// Task status. Transitions are monotone in the direction
/// `NotStarted -> InProgress -> Complete` except for explicit rollback via
/// sync reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotStarted,
    InProgress,
    Complete,
}

impl Status {
    /// Normalize a free-form status string per the frontmatter grammar:
    /// {in_progress, inprogress, in-progress, running} -> InProgress;
    /// {complete, completed, done} -> Complete; anything else -> NotStarted.
    pub fn normalize(raw: &str) -> Status {
        match raw.to_ascii_lowercase().as_str() {
            "in_progress" | "inprogress" | "in-progress" | "running" => Status::InProgress,
            "complete" | "completed" | "done" => Status::Complete,
            _ => Status::NotStarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::InProgress => "in_progress",
            Status::Complete => "complete",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task priority. Ordered high < normal < low for scheduling purposes
/// (see `scheduler::priority_rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Totals + file list for a task's recorded test run, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub files: Vec<String>,
}

/// A unit of work described by one markdown file with YAML frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    /// Explicit dependencies declared in frontmatter. Dangling IDs are
    /// dropped at load time (invariant (a), spec §3).
    pub depends_on: Vec<TaskId>,
    pub needs_review: bool,
    pub test_summary: Option<TestSummary>,
    pub github_issue: Option<i64>,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The implicit predecessor dependency, present only if the
    /// predecessor task actually exists in `all_ids` (invariant (b)).
    pub fn implicit_dependency(&self, all_ids: &std::collections::HashSet<TaskId>) -> Option<TaskId> {
        self.id
            .predecessor()
            .filter(|pred| all_ids.contains(pred))
    }

    /// The full dependency set for readiness purposes: explicit
    /// dependencies plus the implicit predecessor when it exists.
    pub fn effective_dependencies(&self, all_ids: &std::collections::HashSet<TaskId>) -> Vec<TaskId> {
        let mut deps = self.depends_on.clone();
        if let Some(pred) = self.implicit_dependency(all_ids) {
            if !deps.contains(&pred) {
                deps.push(pred);
            }
        }
        deps
    }
}

/// Mapping from module name to an integer tier (0 highest). Unmapped
/// modules default to tier 0. Tier values are non-negative; removing a
/// module's entry is equivalent to setting it to 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPriority(HashMap<String, u32>);

impl GroupPriority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, module: impl Into<String>, tier: u32) {
        self.0.insert(module.into(), tier);
    }

    pub fn unset(&mut self, module: &str) {
        self.0.remove(module);
    }

    pub fn tier_of(&self, module: &str) -> u32 {
        self.0.get(module).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_canonical_display() {
        assert_eq!(TaskId::new("billing", 1).to_string(), "billing/E01");
        assert_eq!(
            TaskId::with_prefix("cli-tui-impl", "CLI", 2).to_string(),
            "cli-tui-impl/CLI02"
        );
    }

    #[test]
    fn task_id_parse_roundtrip() {
        let id = TaskId::with_prefix("cli-tui-impl", "CLI", 2);
        let parsed = TaskId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);

        let id2 = TaskId::new("billing", 7);
        let parsed2 = TaskId::parse(&id2.to_string()).unwrap();
        assert_eq!(parsed2, id2);
    }

    #[test]
    fn task_id_ordering_module_then_prefix_then_number() {
        let a = TaskId::new("billing", 1);
        let b = TaskId::new("test", 0);
        assert!(a < b);

        let c = TaskId::with_prefix("tech", "A", 1);
        let d = TaskId::with_prefix("tech", "B", 0);
        assert!(c < d);
    }

    #[test]
    fn predecessor_is_none_at_zero() {
        assert!(TaskId::new("billing", 0).predecessor().is_none());
        assert_eq!(
            TaskId::new("billing", 1).predecessor(),
            Some(TaskId::new("billing", 0))
        );
    }

    #[test]
    fn status_normalization() {
        assert_eq!(Status::normalize("in_progress"), Status::InProgress);
        assert_eq!(Status::normalize("in-progress"), Status::InProgress);
        assert_eq!(Status::normalize("running"), Status::InProgress);
        assert_eq!(Status::normalize("done"), Status::Complete);
        assert_eq!(Status::normalize("completed"), Status::Complete);
        assert_eq!(Status::normalize("garbage"), Status::NotStarted);
    }

    #[test]
    fn group_priority_defaults_unmapped_modules_to_zero() {
        let mut gp = GroupPriority::new();
        gp.set("tech", 2);
        assert_eq!(gp.tier_of("tech"), 2);
        assert_eq!(gp.tier_of("billing"), 0);
        gp.unset("tech");
        assert_eq!(gp.tier_of("tech"), 0);
    }

    #[test]
    fn implicit_dependency_requires_predecessor_to_exist() {
        let mut ids = std::collections::HashSet::new();
        ids.insert(TaskId::new("billing", 0));
        ids.insert(TaskId::new("billing", 1));

        let task = Task {
            id: TaskId::new("billing", 1),
            title: "x".into(),
            description: String::new(),
            status: Status::NotStarted,
            priority: Priority::Normal,
            depends_on: vec![],
            needs_review: false,
            test_summary: None,
            github_issue: None,
            source_path: PathBuf::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(task.implicit_dependency(&ids), Some(TaskId::new("billing", 0)));

        let orphan = Task {
            id: TaskId::new("test", 5),
            ..task.clone()
        };
        assert_eq!(orphan.implicit_dependency(&ids), None);
    }
}
