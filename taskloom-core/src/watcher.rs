//! Plan watcher (spec §4.6): debounced filesystem observation of markdown
//! changes inside active worktrees.
//!
//! Observes `<worktree>/docs/plans/**/*.md` for each live worktree. Events
//! are debounced per-worktree with a 500ms window; on expiry, the set of
//! changed files is delivered once to the callback. Only write/create
//! events on `.md` paths are considered. Adding and removing a worktree is
//! idempotent; the watcher tracks watched roots as a set.
//!
//! No teacher analog (the teacher repo has no filesystem watcher); `notify`
//! is grounded on its use across the wider retrieval pack.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Error, Result};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// A plan-change batch delivered after the debounce window expires for one
/// worktree root.
#[derive(Debug, Clone)]
pub struct PlanChangeEvent {
    pub worktree_root: PathBuf,
    pub changed_files: Vec<PathBuf>,
}

type ChangeCallback = Arc<dyn Fn(PlanChangeEvent) + Send + Sync>;

/// Watches `docs/plans/**/*.md` under zero or more worktree roots and
/// invokes a callback once per debounce window with the batch of changed
/// files.
pub struct PlanWatcher {
    watched: Arc<Mutex<HashSet<PathBuf>>>,
    _watcher: RecommendedWatcher,
    pending: Arc<Mutex<HashMap<PathBuf, Vec<PathBuf>>>>,
    debounce_tasks: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
    callback: ChangeCallback,
}

impl PlanWatcher {
    /// Build a watcher that invokes `callback` once per debounced batch of
    /// plan-file changes.
    pub fn new<F>(callback: F) -> Result<Self>
    where
        F: Fn(PlanChangeEvent) + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();

        let notify_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| Error::Other(format!("failed to create filesystem watcher: {}", e)))?;

        let watched = Arc::new(Mutex::new(HashSet::new()));
        let pending: Arc<Mutex<HashMap<PathBuf, Vec<PathBuf>>>> = Arc::new(Mutex::new(HashMap::new()));
        let debounce_tasks: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>> = Arc::new(Mutex::new(HashMap::new()));
        let callback: ChangeCallback = Arc::new(callback);

        let watched_for_dispatch = watched.clone();
        let pending_for_dispatch = pending.clone();
        let debounce_tasks_for_dispatch = debounce_tasks.clone();
        let callback_for_dispatch = callback.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in event.paths {
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    let Some(root) = find_owning_root(&path, &watched_for_dispatch) else {
                        continue;
                    };

                    {
                        let mut pending = pending_for_dispatch.lock().unwrap();
                        let entry = pending.entry(root.clone()).or_default();
                        if !entry.contains(&path) {
                            entry.push(path.clone());
                        }
                    }

                    schedule_flush(
                        root,
                        pending_for_dispatch.clone(),
                        debounce_tasks_for_dispatch.clone(),
                        callback_for_dispatch.clone(),
                    );
                }
            }
        });

        Ok(Self {
            watched,
            _watcher: notify_watcher,
            pending,
            debounce_tasks,
            callback,
        })
    }

    /// Add a worktree root to observe (its `docs/plans` subtree).
    /// Idempotent: adding an already-watched root is a no-op.
    pub fn add_worktree(&mut self, worktree_root: &Path) -> Result<()> {
        let mut watched = self.watched.lock().unwrap();
        if !watched.insert(worktree_root.to_path_buf()) {
            return Ok(());
        }
        drop(watched);

        let plans_dir = worktree_root.join("docs").join("plans");
        if plans_dir.exists() {
            self._watcher
                .watch(&plans_dir, RecursiveMode::Recursive)
                .map_err(|e| Error::Other(format!("failed to watch {}: {}", plans_dir.display(), e)))?;
        }
        Ok(())
    }

    /// Remove a worktree root from observation. Idempotent.
    pub fn remove_worktree(&mut self, worktree_root: &Path) -> Result<()> {
        let mut watched = self.watched.lock().unwrap();
        if !watched.remove(worktree_root) {
            return Ok(());
        }
        drop(watched);

        let plans_dir = worktree_root.join("docs").join("plans");
        let _ = self._watcher.unwatch(&plans_dir);
        self.pending.lock().unwrap().remove(worktree_root);
        if let Some(handle) = self.debounce_tasks.lock().unwrap().remove(worktree_root) {
            handle.abort();
        }
        Ok(())
    }

    /// The set of currently watched worktree roots.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.watched.lock().unwrap().iter().cloned().collect()
    }

    #[cfg(test)]
    fn callback_ref(&self) -> ChangeCallback {
        self.callback.clone()
    }
}

fn find_owning_root(path: &Path, watched: &Mutex<HashSet<PathBuf>>) -> Option<PathBuf> {
    let watched = watched.lock().unwrap();
    watched.iter().find(|root| path.starts_with(root)).cloned()
}

fn schedule_flush(
    root: PathBuf,
    pending: Arc<Mutex<HashMap<PathBuf, Vec<PathBuf>>>>,
    debounce_tasks: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
    callback: ChangeCallback,
) {
    let mut tasks = debounce_tasks.lock().unwrap();
    if let Some(existing) = tasks.remove(&root) {
        existing.abort();
    }

    let root_for_task = root.clone();
    let pending_for_task = pending.clone();
    let debounce_tasks_for_task = debounce_tasks.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(DEBOUNCE).await;
        let changed_files = pending_for_task.lock().unwrap().remove(&root_for_task).unwrap_or_default();
        debounce_tasks_for_task.lock().unwrap().remove(&root_for_task);
        if !changed_files.is_empty() {
            callback(PlanChangeEvent {
                worktree_root: root_for_task,
                changed_files,
            });
        }
    });

    tasks.insert(root, handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_remove_worktree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/plans")).unwrap();

        let mut watcher = PlanWatcher::new(|_event| {}).unwrap();
        watcher.add_worktree(dir.path()).unwrap();
        watcher.add_worktree(dir.path()).unwrap();
        assert_eq!(watcher.watched_roots().len(), 1);

        watcher.remove_worktree(dir.path()).unwrap();
        watcher.remove_worktree(dir.path()).unwrap();
        assert!(watcher.watched_roots().is_empty());
    }

    #[tokio::test]
    async fn detects_and_debounces_markdown_writes() {
        let dir = tempfile::tempdir().unwrap();
        let plans = dir.path().join("docs/plans/billing");
        std::fs::create_dir_all(&plans).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let mut watcher = PlanWatcher::new(move |event| {
            events_clone.lock().unwrap().push(event);
        })
        .unwrap();
        let _ = watcher.callback_ref();
        watcher.add_worktree(dir.path()).unwrap();

        let file = plans.join("epic-00-setup.md");
        std::fs::write(&file, "---\nstatus: complete\n---\n").unwrap();

        tokio::time::sleep(Duration::from_millis(900)).await;

        let captured = events.lock().unwrap();
        assert!(captured.iter().any(|e| e.changed_files.iter().any(|p| p == &file)));
    }
}
