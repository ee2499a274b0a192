//! Subprocess handle shared by both executor profiles.

use std::path::Path;
use tokio::process::{Child, Command};

use crate::{Error, Result};

/// Handle to a running executor child process.
pub struct AgentHandle {
    /// The child process (not Debug, so we skip it)
    child: Child,
    /// The prompt that was given to the agent
    prompt: String,
    /// Working directory for the agent
    workdir: String,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("prompt", &self.prompt)
            .field("workdir", &self.workdir)
            .field("child", &"<Child>")
            .finish()
    }
}

impl AgentHandle {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Get mutable access to the child process for output streaming
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Take stdout, leaving the child without it (stream dispatch owns it).
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take stderr, leaving the child without it.
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(Error::Io)
    }

    /// Terminate the child's process group. On Unix this sends SIGKILL to
    /// the child; propagation to grandchildren (git, editors) relies on the
    /// supervisor having started the child in its own process group.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(Error::Io)
    }
}

/// Verify the working directory exists, spawn `cmd`, and wrap the child.
/// Shared by both executor profiles so the "workdir missing" / "executable
/// not found" error messages stay consistent.
pub(crate) fn spawn_checked(
    mut cmd: Command,
    prompt: String,
    workdir: &Path,
    exe_label: &str,
) -> Result<AgentHandle> {
    let workdir_str = workdir
        .to_str()
        .ok_or_else(|| Error::Supervisor("invalid working directory path".to_string()))?
        .to_string();

    if !workdir.exists() {
        return Err(Error::Supervisor(format!(
            "working directory does not exist: {}",
            workdir_str
        )));
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Supervisor(format!("{} executable not found on PATH", exe_label))
        } else {
            Error::Io(e)
        }
    })?;

    Ok(AgentHandle {
        child,
        prompt,
        workdir: workdir_str,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_checked_rejects_missing_workdir() {
        let cmd = Command::new("true");
        let result = spawn_checked(cmd, "p".into(), Path::new("/nonexistent/path/12345"), "true");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Supervisor(_)));
    }
}
