//! Git plumbing for the sync engine's commit/push contract (spec §4.5):
//! pull, commit, and push, shelled out the same way `git/worktree.rs`
//! shells `git worktree` porcelain rather than reimplementing remote
//! transport over `git2`.

use std::process::Command;

use super::repo::GitRepo;
use crate::{Error, Result};

/// Whether `sync_task_status`'s push landed, and if not, why — callers
/// surface `LocalOnly`/`PushFailed` as warnings rather than hard errors
/// (spec §4.5: "commit locally and surface the push failure as a
/// warning").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The rewritten file(s) already matched what was committed; nothing
    /// to commit or push.
    NoChange,
    /// No remote is configured; committed locally only, by design.
    NoRemote,
    /// Committed and pushed.
    Pushed,
    /// Committed locally; the push itself failed non-fatally.
    PushFailed(String),
}

impl GitRepo {
    /// `git pull --ff-only` against the current branch's upstream. A
    /// missing remote or a diverged history is not fatal here — the
    /// caller proceeds to write and commit against whatever local state
    /// exists; the next reconciliation pass converges (spec §4.5
    /// "Multi-file consistency is best-effort").
    pub fn pull(&self) -> Result<()> {
        if self.default_remote().is_err() {
            return Ok(());
        }
        let output = Command::new("git")
            .arg("pull")
            .arg("--ff-only")
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Sync(format!("failed to run git pull: {}", e)))?;
        if !output.status.success() {
            tracing::warn!(
                "git pull failed, proceeding with local state: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// `git add <paths> && git commit -m <message>`. An empty diff (the
    /// content was already at the target status) is not an error.
    pub fn commit_paths(&self, paths: &[&std::path::Path], message: &str) -> Result<bool> {
        let mut add = Command::new("git");
        add.arg("add");
        for path in paths {
            add.arg(path);
        }
        let add_output = add
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Sync(format!("failed to run git add: {}", e)))?;
        if !add_output.status.success() {
            return Err(Error::Sync(format!(
                "git add failed: {}",
                String::from_utf8_lossy(&add_output.stderr).trim()
            )));
        }

        let commit_output = Command::new("git")
            .arg("commit")
            .arg("-m")
            .arg(message)
            .current_dir(self.root())
            .output()
            .map_err(|e| Error::Sync(format!("failed to run git commit: {}", e)))?;

        if commit_output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&commit_output.stderr);
        if stderr.contains("nothing to commit") {
            return Ok(false);
        }
        Err(Error::Sync(format!("git commit failed: {}", stderr.trim())))
    }

    /// `git push` to the current branch's remote, classified into a
    /// `PushOutcome` so the caller can decide warning vs. success.
    pub fn push(&self) -> PushOutcome {
        if self.default_remote().is_err() {
            return PushOutcome::NoRemote;
        }
        match Command::new("git").arg("push").current_dir(self.root()).output() {
            Ok(output) if output.status.success() => PushOutcome::Pushed,
            Ok(output) => PushOutcome::PushFailed(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            Err(e) => PushOutcome::PushFailed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_outcome_variants_are_distinguishable() {
        assert_ne!(PushOutcome::NoRemote, PushOutcome::Pushed);
        assert_ne!(PushOutcome::Pushed, PushOutcome::PushFailed("x".to_string()));
    }
}
