//! Worktree manager: isolated per-task checkouts (spec §4.3).
//!
//! Branch naming: `feat/<module>-E<NN>` (or `feat/<module>-<PREFIX><NN>`
//! with a prefix). Worktree directory naming: `<module>-E<NN>-<rand6>`
//! under the configured worktree root, where `rand6` is six hex
//! characters of cryptographic randomness — this is what keeps two
//! worktrees for the same task distinguishable after a force-remove.

use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::git::{BranchingPoint, GitRepo, WorktreeOptions};
use crate::task::TaskId;
use crate::{Error, Result};

/// Owns the worktree directory tree and the `feat/*` branch namespace for
/// one repository.
pub struct WorktreeManager {
    repo: GitRepo,
    worktree_root: PathBuf,
}

fn branch_tag(id: &TaskId) -> String {
    if id.prefix.is_empty() {
        "E".to_string()
    } else {
        id.prefix.clone()
    }
}

/// `feat/<module>-E<NN>` or `feat/<module>-<PREFIX><NN>`.
pub fn branch_name(id: &TaskId) -> String {
    format!("feat/{}-{}{:02}", id.module, branch_tag(id), id.epic)
}

fn rand6() -> String {
    let mut buf = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

fn dir_name(id: &TaskId) -> String {
    format!("{}-{}{:02}-{}", id.module, branch_tag(id), id.epic, rand6())
}

impl WorktreeManager {
    pub fn new(repo: GitRepo, worktree_root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            worktree_root: worktree_root.into(),
        }
    }

    pub fn branch_name(&self, id: &TaskId) -> String {
        branch_name(id)
    }

    /// The commit to branch from: `origin/main` if it exists, else `HEAD`.
    fn base_commit(&self) -> Result<BranchingPoint> {
        if let Err(e) = self.repo.fetch(None) {
            tracing::warn!("fetch before worktree create failed, using local state: {}", e);
        }

        let repo = self.repo.inner();
        if let Ok(reference) = repo.find_reference("refs/remotes/origin/main") {
            let commit = reference
                .peel_to_commit()
                .map_err(|e| Error::Worktree(format!("failed to resolve origin/main: {}", e)))?;
            return Ok(BranchingPoint {
                reference: "origin/main".to_string(),
                commit: commit.id().to_string(),
                branch_name: "main".to_string(),
            });
        }

        let head = repo
            .head()
            .map_err(|e| Error::Worktree(format!("failed to resolve HEAD: {}", e)))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| Error::Worktree(format!("failed to resolve HEAD commit: {}", e)))?;
        Ok(BranchingPoint {
            reference: "HEAD".to_string(),
            commit: commit.id().to_string(),
            branch_name: head.shorthand().unwrap_or("HEAD").to_string(),
        })
    }

    /// Force-remove any existing worktree checked out onto `branch`.
    fn prune_conflicting(&self, branch: &str) -> Result<()> {
        for entry in self.repo.list_worktree_entries()? {
            if entry.branch.as_deref() == Some(branch) {
                self.repo.remove_worktree(&entry.path)?;
            }
        }
        Ok(())
    }

    /// Create a fresh isolated checkout for `id`. Steps per the Create
    /// contract: prune any stale worktree on the target branch, delete the
    /// branch if it still exists, fetch and pick a base, then create
    /// branch + worktree atomically.
    pub fn create(&self, id: &TaskId) -> Result<PathBuf> {
        let branch = self.branch_name(id);

        self.prune_conflicting(&branch)?;
        self.repo.delete_branch(&branch)?;

        let base = self.base_commit()?;

        let worktree_dir = self.worktree_root.join(dir_name(id));
        let info = self.repo.create_worktree(
            &worktree_dir,
            &base,
            &WorktreeOptions {
                branch_name: branch,
            },
        )?;

        Ok(info.path)
    }

    /// Remove `path`: read its current branch, force-remove the worktree,
    /// then delete the branch. Missing branch is not an error.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let branch = self
            .repo
            .list_worktree_entries()?
            .into_iter()
            .find(|e| e.path == path)
            .and_then(|e| e.branch);

        self.repo.remove_worktree(path)?;

        if let Some(branch) = branch {
            self.repo.delete_branch(&branch)?;
        }

        Ok(())
    }

    /// Active worktree paths, excluding the repository's own main checkout.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let root = self.repo.root().to_path_buf();
        Ok(self
            .repo
            .list_worktree_entries()?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| p != &root)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_no_prefix() {
        let id = TaskId::new("technical", 5);
        assert_eq!(branch_name(&id), "feat/technical-E05");
    }

    #[test]
    fn branch_name_with_prefix() {
        let id = TaskId::with_prefix("cli-tui-impl", "CLI", 2);
        assert_eq!(branch_name(&id), "feat/cli-tui-impl-CLI02");
    }

    #[test]
    fn dir_name_has_six_hex_char_suffix() {
        let id = TaskId::new("billing", 1);
        let name = dir_name(&id);
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(name.starts_with("billing-E01-"));
    }

    #[test]
    fn rand6_is_six_hex_chars() {
        let s = rand6();
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
