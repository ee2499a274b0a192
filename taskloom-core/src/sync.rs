//! Two-way sync engine (spec §4.5): reconciles markdown <-> store,
//! detects conflicts, writes back status atomically into the epic file
//! and the README index.
//!
//! No direct teacher analog; modeled on the teacher's `Result`-per-unit
//! and atomic single-file-rewrite idiom (one "error on failure, otherwise
//! proceed" flow per file).

use std::collections::HashMap;
use std::path::Path;

use crate::git::{GitRepo, PushOutcome};
use crate::parser::{self, status_emoji};
use crate::task::{Status, Task, TaskId};
use crate::{Error, Result};

/// A task whose markdown-reported and store-reported status disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub id: TaskId,
    pub markdown_status: Status,
    pub store_status: Status,
}

/// Outcome of one `TwoWaySync` pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Tasks imported markdown -> store (present only in markdown).
    pub imported: Vec<TaskId>,
    /// Tasks written store -> markdown (present only in the store).
    pub written_back: Vec<TaskId>,
    /// Tasks whose statuses already agreed; no-op.
    pub unchanged: Vec<TaskId>,
    /// Tasks whose statuses disagreed; neither side was written.
    pub conflicts: Vec<Conflict>,
}

impl SyncReport {
    pub fn write_count(&self) -> usize {
        self.imported.len() + self.written_back.len()
    }
}

/// The store side of a two-way sync: whatever holds the durable task
/// records. Abstracted as a trait so the sync engine doesn't depend
/// directly on `taskloom-db` (kept optional behind the `database`
/// feature elsewhere in the crate).
pub trait TaskStore {
    fn all(&self) -> Result<Vec<Task>>;
    fn get(&self, id: &TaskId) -> Result<Option<Task>>;
    fn upsert(&mut self, task: &Task) -> Result<()>;
}

/// In-memory `TaskStore` used by tests and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: HashMap<TaskId, Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryStore {
    fn all(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.values().cloned().collect())
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).cloned())
    }

    fn upsert(&mut self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }
}

/// `TwoWaySync`: reconcile the full markdown scan against the store.
///
/// For each task present in either source:
/// - only markdown has it -> import to store;
/// - only store has it -> write back to markdown;
/// - both have it, statuses agree -> no-op;
/// - both have it, statuses differ -> conflict; neither side is written.
///
/// Idempotent: a second call with no intervening change returns zero
/// conflicts and zero writes (every disagreement from the first call is
/// either a conflict, left untouched, or resolved into agreement).
pub fn two_way_sync<S: TaskStore>(store: &mut S, markdown_tasks: &[Task]) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let markdown_by_id: HashMap<TaskId, &Task> = markdown_tasks.iter().map(|t| (t.id.clone(), t)).collect();
    let store_tasks = store.all()?;
    let store_by_id: HashMap<TaskId, Task> = store_tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

    let all_ids: std::collections::HashSet<TaskId> = markdown_by_id
        .keys()
        .chain(store_by_id.keys())
        .cloned()
        .collect();

    for id in all_ids {
        match (markdown_by_id.get(&id), store_by_id.get(&id)) {
            (Some(md), None) => {
                store.upsert(md)?;
                report.imported.push(id);
            }
            (None, Some(db)) => {
                if write_back_to_markdown(db)? {
                    report.written_back.push(id);
                } else {
                    report.unchanged.push(id);
                }
            }
            (Some(md), Some(db)) => {
                if md.status == db.status {
                    report.unchanged.push(id);
                } else {
                    report.conflicts.push(Conflict {
                        id,
                        markdown_status: md.status,
                        store_status: db.status,
                    });
                }
            }
            (None, None) => unreachable!("id came from one of the two maps"),
        }
    }

    Ok(report)
}

/// Write a store-only task's current status back to its source markdown
/// file. Returns `false` (no write performed) when the file already
/// renders to the same text, so a converged pass reports zero writes per
/// `two_way_sync`'s idempotency contract. A task with no source path
/// (store-only test fixtures) is left untouched.
fn write_back_to_markdown(task: &Task) -> Result<bool> {
    if task.source_path.as_os_str().is_empty() {
        return Ok(false);
    }

    let rendered = parser::serialize_task(task);
    if let Ok(existing) = std::fs::read_to_string(&task.source_path) {
        if existing == rendered {
            return Ok(false);
        }
    }

    if let Some(parent) = task.source_path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    std::fs::write(&task.source_path, rendered).map_err(Error::Io)?;
    Ok(true)
}

/// Which source wins for a given conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Db,
    Markdown,
}

/// `ResolveConflicts`: apply the chosen source to the other for each
/// resolution. Every conflict in `conflicts` must have an entry in
/// `resolutions`, or this returns an error.
pub fn resolve_conflicts<S: TaskStore>(
    store: &mut S,
    conflicts: &[Conflict],
    resolutions: &HashMap<TaskId, Resolution>,
    markdown_tasks: &mut [Task],
) -> Result<()> {
    for conflict in conflicts {
        let resolution = resolutions
            .get(&conflict.id)
            .ok_or_else(|| Error::Sync(format!("no resolution provided for conflict on {}", conflict.id)))?;

        match resolution {
            Resolution::Db => {
                if let Some(task) = markdown_tasks.iter_mut().find(|t| t.id == conflict.id) {
                    task.status = conflict.store_status;
                }
            }
            Resolution::Markdown => {
                if let Some(mut task) = store.get(&conflict.id)? {
                    task.status = conflict.markdown_status;
                    store.upsert(&task)?;
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the epic file's frontmatter status in place (file-level
/// atomicity: one write of the joined frontmatter+body). Leaves git and
/// the README untouched — used directly by tests and by
/// `sync_task_status` before it takes the repository-wide path.
pub fn write_epic_status(task: &mut Task, status: Status, epic_path: &Path) -> Result<()> {
    task.status = status;
    task.updated_at = chrono::Utc::now();
    let rendered = parser::serialize_task(task);
    std::fs::write(epic_path, rendered).map_err(Error::Io)
}

/// `SyncTaskStatus` (spec §4.5): atomically pull the repository, rewrite
/// the epic file's frontmatter status and the README's emoji for that
/// row, commit with a descriptive message, and push. A missing remote or
/// a non-fatal push failure still leaves the local commit in place; the
/// caller surfaces the returned `PushOutcome` as a warning rather than an
/// error in that case.
pub fn sync_task_status(
    repo: &GitRepo,
    task: &mut Task,
    status: Status,
    epic_path: &Path,
    readme_path: Option<&Path>,
) -> Result<PushOutcome> {
    repo.pull()?;

    write_epic_status(task, status, epic_path)?;

    let mut paths = vec![epic_path];
    if let Some(readme_path) = readme_path {
        if readme_path.exists() {
            let readme = std::fs::read_to_string(readme_path).map_err(Error::Io)?;
            let updated = rewrite_readme_status(&readme, &task.id, status);
            if updated != readme {
                std::fs::write(readme_path, updated).map_err(Error::Io)?;
            }
        }
        paths.push(readme_path);
    }

    let message = format!("sync: {} -> {}", task.id, status.as_str());
    let committed = repo.commit_paths(&paths, &message)?;
    if !committed {
        return Ok(PushOutcome::NoChange);
    }

    Ok(repo.push())
}

/// Rewrite the README row for `id` to the emoji matching `status`. Rows
/// not matching `id` are left untouched. Returns the new README text.
pub fn rewrite_readme_status(readme: &str, id: &TaskId, status: Status) -> String {
    let target_emoji = status_emoji(status);
    let mut out = String::with_capacity(readme.len());

    for line in readme.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('|') {
            if let Some(link_start) = trimmed.find("](") {
                let after = &trimmed[link_start + 2..];
                if let Some(link_end) = after.find(')') {
                    let link = &after[..link_end];
                    if link.ends_with(".md") {
                        if let Some(row_id) = parser::extract_task_id_from_path(Path::new(link)) {
                            if &row_id == id {
                                out.push_str(&replace_emoji(line, target_emoji));
                                out.push('\n');
                                continue;
                            }
                        }
                    }
                }
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    out
}

fn replace_emoji(line: &str, new_emoji: &str) -> String {
    let mut result = line.to_string();
    for emoji in ["🔴", "🟡", "🟢"] {
        if result.contains(emoji) {
            result = result.replace(emoji, new_emoji);
            return result;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use std::path::PathBuf;

    fn task(module: &str, epic: u32, status: Status) -> Task {
        Task {
            id: TaskId::new(module, epic),
            title: "t".into(),
            description: String::new(),
            status,
            priority: Priority::Normal,
            depends_on: vec![],
            needs_review: false,
            test_summary: None,
            github_issue: None,
            source_path: PathBuf::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn s1_imports_markdown_only_tasks() {
        let mut store = MemoryStore::new();
        let tasks = vec![
            task("billing", 0, Status::Complete),
            task("billing", 1, Status::Complete),
            task("test", 0, Status::Complete),
            task("test", 1, Status::InProgress),
            task("test", 2, Status::NotStarted),
        ];
        let report = two_way_sync(&mut store, &tasks).unwrap();
        assert_eq!(report.imported.len(), 5);
        assert_eq!(store.all().unwrap().len(), 5);
    }

    #[test]
    fn s6_conflict_writes_neither_side_then_resolves() {
        let mut store = MemoryStore::new();
        let mut md_task = task("billing", 0, Status::Complete);
        store.upsert(&task("billing", 0, Status::InProgress)).unwrap();

        let mut markdown_tasks = vec![md_task.clone()];
        let report = two_way_sync(&mut store, &markdown_tasks).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.write_count(), 0);

        let mut resolutions = HashMap::new();
        resolutions.insert(TaskId::new("billing", 0), Resolution::Markdown);
        resolve_conflicts(&mut store, &report.conflicts, &resolutions, &mut markdown_tasks).unwrap();
        md_task.status = Status::Complete;

        assert_eq!(store.get(&TaskId::new("billing", 0)).unwrap().unwrap().status, Status::Complete);

        let second = two_way_sync(&mut store, &markdown_tasks).unwrap();
        assert_eq!(second.conflicts.len(), 0);
    }

    #[test]
    fn idempotent_on_no_op_second_pass() {
        let mut store = MemoryStore::new();
        let tasks = vec![task("billing", 0, Status::Complete)];
        two_way_sync(&mut store, &tasks).unwrap();
        let second = two_way_sync(&mut store, &tasks).unwrap();
        assert_eq!(second.conflicts.len(), 0);
        assert_eq!(second.write_count(), 0);
        assert_eq!(second.unchanged, vec![TaskId::new("billing", 0)]);
    }

    #[test]
    fn store_only_task_is_written_back_then_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epic-00-x.md");

        let mut store = MemoryStore::new();
        let mut db_task = task("billing", 0, Status::Complete);
        db_task.source_path = path.clone();
        store.upsert(&db_task).unwrap();

        let report = two_way_sync(&mut store, &[]).unwrap();
        assert_eq!(report.written_back, vec![TaskId::new("billing", 0)]);
        assert_eq!(report.write_count(), 1);
        assert!(std::fs::read_to_string(&path).unwrap().contains("status: complete"));

        let second = two_way_sync(&mut store, &[]).unwrap();
        assert_eq!(second.write_count(), 0);
        assert_eq!(second.unchanged, vec![TaskId::new("billing", 0)]);
    }

    #[test]
    fn resolve_conflicts_requires_coverage_of_every_conflict() {
        let mut store = MemoryStore::new();
        store.upsert(&task("billing", 0, Status::InProgress)).unwrap();
        let mut markdown_tasks = vec![task("billing", 0, Status::Complete)];
        let report = two_way_sync(&mut store, &markdown_tasks).unwrap();
        let err = resolve_conflicts(&mut store, &report.conflicts, &HashMap::new(), &mut markdown_tasks).unwrap_err();
        assert!(matches!(err, Error::Sync(_)));
    }

    #[test]
    fn readme_round_trip_writes_then_reparses_matching_status() {
        let readme = "| [Bill](billing/epic-01-bill.md) | 🔴 |\n";
        let updated = rewrite_readme_status(readme, &TaskId::new("billing", 1), Status::Complete);
        let statuses = parser::parse_readme_statuses(&updated);
        assert_eq!(statuses.get(&TaskId::new("billing", 1)), Some(&Status::Complete));
    }

    #[test]
    fn write_epic_status_rewrites_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epic-00-x.md");
        std::fs::write(&path, "---\nstatus: not_started\n---\n# X\n\nbody\n").unwrap();

        let mut t = task("m", 0, Status::NotStarted);
        write_epic_status(&mut t, Status::Complete, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("status: complete"));
    }

    fn init_test_repo() -> (tempfile::TempDir, crate::git::GitRepo) {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        for (key, value) in [("user.email", "test@example.com"), ("user.name", "Test")] {
            std::process::Command::new("git")
                .args(["config", key, value])
                .current_dir(dir.path())
                .status()
                .unwrap();
        }
        let repo = crate::git::GitRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn sync_task_status_commits_with_no_remote() {
        let (dir, repo) = init_test_repo();
        let path = dir.path().join("epic-00-x.md");
        std::fs::write(&path, "---\nstatus: not_started\n---\n# X\n\nbody\n").unwrap();

        let mut t = task("m", 0, Status::NotStarted);
        let outcome = sync_task_status(&repo, &mut t, Status::Complete, &path, None).unwrap();
        assert_eq!(outcome, PushOutcome::NoRemote);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("status: complete"));
    }

    #[test]
    fn sync_task_status_is_a_no_op_when_already_synced() {
        let (dir, repo) = init_test_repo();
        let path = dir.path().join("epic-00-x.md");
        std::fs::write(&path, "---\nstatus: not_started\n---\n# X\n\nbody\n").unwrap();

        let mut t = task("m", 0, Status::NotStarted);
        sync_task_status(&repo, &mut t, Status::Complete, &path, None).unwrap();

        let outcome = sync_task_status(&repo, &mut t, Status::Complete, &path, None).unwrap();
        assert_eq!(outcome, PushOutcome::NoChange);
    }

    #[test]
    fn sync_task_status_also_rewrites_readme_row() {
        let (dir, repo) = init_test_repo();
        let epic_path = dir.path().join("billing").join("epic-01-bill.md");
        std::fs::create_dir_all(epic_path.parent().unwrap()).unwrap();
        std::fs::write(&epic_path, "---\nstatus: not_started\n---\n# Bill\n\nbody\n").unwrap();

        let readme_path = dir.path().join("README.md");
        std::fs::write(&readme_path, "| [Bill](billing/epic-01-bill.md) | 🔴 |\n").unwrap();

        let mut t = task("billing", 1, Status::NotStarted);
        sync_task_status(&repo, &mut t, Status::Complete, &epic_path, Some(&readme_path)).unwrap();

        let readme = std::fs::read_to_string(&readme_path).unwrap();
        assert!(readme.contains('🟢'));
    }
}
