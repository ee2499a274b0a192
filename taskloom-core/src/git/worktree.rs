//! Low-level `git worktree` primitives. The naming scheme, pruning, and
//! branch lifecycle required by the worktree manager contract live in
//! `crate::worktree`; this module only wraps the shelled git commands.

use std::path::{Path, PathBuf};
use std::process::Command;

use git2::{BranchType, ErrorCode};

use super::branch::BranchingPoint;
use super::repo::GitRepo;
use crate::{Error, Result};

/// Options for creating a worktree.
#[derive(Debug, Clone)]
pub struct WorktreeOptions {
    pub branch_name: String,
}

/// Information about a created worktree.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub commit: String,
}

/// One entry parsed from `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

impl GitRepo {
    /// `git worktree add -b <branch> <path> <start-point>`.
    pub fn create_worktree(
        &self,
        worktree_dir: &Path,
        branching_point: &BranchingPoint,
        options: &WorktreeOptions,
    ) -> Result<WorktreeInfo> {
        if let Some(parent) = worktree_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = Command::new("git")
            .arg("worktree")
            .arg("add")
            .arg("-b")
            .arg(&options.branch_name)
            .arg(worktree_dir)
            .arg(&branching_point.commit)
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Worktree(format!("failed to run git worktree add: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Worktree(format!(
                "git worktree add failed: {}",
                stderr.trim()
            )));
        }

        Ok(WorktreeInfo {
            path: worktree_dir.to_path_buf(),
            branch: options.branch_name.clone(),
            commit: branching_point.commit.clone(),
        })
    }

    /// `git worktree remove --force`, falling back to a manual directory
    /// removal if the worktree was never properly registered.
    pub fn remove_worktree(&self, worktree_dir: &Path) -> Result<()> {
        let output = Command::new("git")
            .arg("worktree")
            .arg("remove")
            .arg("--force")
            .arg(worktree_dir)
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Worktree(format!("failed to run git worktree remove: {}", e)))?;

        if !output.status.success() && worktree_dir.exists() {
            std::fs::remove_dir_all(worktree_dir).map_err(|e| {
                Error::Worktree(format!("failed to remove worktree directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// `git worktree list --porcelain`, carrying each entry's checked-out
    /// branch (if any — the main worktree on a detached HEAD has none).
    pub fn list_worktree_entries(&self) -> Result<Vec<WorktreeEntry>> {
        let output = Command::new("git")
            .arg("worktree")
            .arg("list")
            .arg("--porcelain")
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Worktree(format!("failed to run git worktree list: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Worktree("git worktree list failed".to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        let mut current: Option<WorktreeEntry> = None;

        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(e) = current.take() {
                    entries.push(e);
                }
                current = Some(WorktreeEntry {
                    path: PathBuf::from(path),
                    branch: None,
                });
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                if let Some(e) = current.as_mut() {
                    e.branch = Some(
                        branch_ref
                            .strip_prefix("refs/heads/")
                            .unwrap_or(branch_ref)
                            .to_string(),
                    );
                }
            }
        }
        if let Some(e) = current.take() {
            entries.push(e);
        }

        Ok(entries)
    }

    /// Delete a local branch. Missing branch is not an error.
    pub fn delete_branch(&self, branch_name: &str) -> Result<()> {
        match self.inner().find_branch(branch_name, BranchType::Local) {
            Ok(mut branch) => branch.delete().map_err(|e| {
                Error::Worktree(format!("failed to delete branch {}: {}", branch_name, e))
            }),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(Error::Git(e)),
        }
    }
}
