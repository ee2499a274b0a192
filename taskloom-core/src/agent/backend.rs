//! Executor backends: the two vendor child-process profiles agents run
//! under (see `EXTERNAL INTERFACES`). Profile A streams JSONL on stdout and
//! is addressed by session UUID; profile B is a non-streaming continuation
//! CLI configured through an environment variable pointing at a converted
//! MCP config file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use crate::Result;

use super::spawn::{spawn_checked, AgentHandle};

/// Which executor profile a task is configured to run under
/// (`executor_type` in the config table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    #[serde(alias = "profile-a", alias = "a")]
    ProfileA,
    #[serde(alias = "profile-b", alias = "b")]
    ProfileB,
}

/// Everything a backend needs to build its argument vector for one spawn
/// or resume.
pub struct SpawnRequest<'a> {
    pub prompt: &'a str,
    pub workdir: &'a Path,
    pub session_id: Uuid,
    /// Resume an existing session instead of starting a fresh one.
    pub resume: bool,
    /// Profile A only: inline JSON passed to `--mcp-config`.
    pub mcp_config_inline: Option<&'a str>,
    /// Profile B only: (env var name, path to the converted MCP config file).
    pub mcp_config_env: Option<(&'a str, &'a Path)>,
}

/// Trait for executor child-process backends.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the command for one spawn or resume, without spawning it.
    fn build_command(&self, req: &SpawnRequest<'_>) -> Command;

    /// Spawn an agent per `req`.
    async fn spawn(&self, req: &SpawnRequest<'_>) -> Result<AgentHandle>;

    /// Whether this backend's executable is reachable on the system.
    fn is_available(&self) -> bool;
}

/// Profile A: streaming JSONL, session-named.
#[derive(Debug, Clone)]
pub struct ProfileABackend {
    executable: String,
}

impl ProfileABackend {
    pub fn new() -> Self {
        Self {
            executable: "claude".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.executable = path.into();
        self
    }
}

impl Default for ProfileABackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ProfileABackend {
    fn name(&self) -> &'static str {
        "profile-a"
    }

    fn build_command(&self, req: &SpawnRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--print")
            .arg("--verbose")
            .arg("--dangerously-skip-permissions")
            .arg("--output-format")
            .arg("stream-json");

        if req.resume {
            cmd.arg("--resume").arg(req.session_id.to_string());
        } else {
            cmd.arg("--session-id").arg(req.session_id.to_string());
        }

        if let Some(mcp) = req.mcp_config_inline {
            cmd.arg("--mcp-config").arg(mcp);
        }

        cmd.arg("-p").arg(req.prompt);

        cmd.current_dir(req.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }

    async fn spawn(&self, req: &SpawnRequest<'_>) -> Result<AgentHandle> {
        let cmd = self.build_command(req);
        spawn_checked(cmd, req.prompt.to_string(), req.workdir, &self.executable)
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

/// Profile B: non-streaming continuation CLI, MCP config delivered through
/// an environment variable.
#[derive(Debug, Clone)]
pub struct ProfileBBackend {
    executable: String,
    model: Option<String>,
}

impl ProfileBBackend {
    pub fn new() -> Self {
        Self {
            executable: "opencode".to_string(),
            model: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.executable = path.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for ProfileBBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ProfileBBackend {
    fn name(&self) -> &'static str {
        "profile-b"
    }

    fn build_command(&self, req: &SpawnRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("run");

        if req.resume {
            cmd.arg("-c");
        }

        if let Some(ref model) = self.model {
            cmd.arg("-m").arg(model);
        }

        if !req.resume {
            cmd.arg(req.prompt);
        }

        if let Some((var, path)) = req.mcp_config_env {
            cmd.env(var, path);
        }

        cmd.current_dir(req.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }

    async fn spawn(&self, req: &SpawnRequest<'_>) -> Result<AgentHandle> {
        let cmd = self.build_command(req);
        spawn_checked(cmd, req.prompt.to_string(), req.workdir, &self.executable)
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

/// Registry of configured backends, keyed by name.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ProfileABackend::new()));
        registry.register(Box::new(ProfileBBackend::new()));
        registry
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.get(name).map(|b| b.as_ref())
    }

    pub fn list_available(&self) -> Vec<&str> {
        self.backends
            .values()
            .filter(|b| b.is_available())
            .map(|b| b.name())
            .collect()
    }

    pub fn list_registered(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }

    pub fn get_by_type(&self, executor_type: ExecutorType) -> Option<&dyn Backend> {
        match executor_type {
            ExecutorType::ProfileA => self.get("profile-a"),
            ExecutorType::ProfileB => self.get("profile-b"),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(session_id: Uuid) -> SpawnRequest<'static> {
        SpawnRequest {
            prompt: "do the thing",
            workdir: Path::new("/tmp"),
            session_id,
            resume: false,
            mcp_config_inline: None,
            mcp_config_env: None,
        }
    }

    #[test]
    fn profile_a_fresh_session_uses_session_id_flag() {
        let backend = ProfileABackend::new();
        let id = Uuid::nil();
        let cmd = backend.build_command(&req(id));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"--session-id".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
        assert!(args.contains(&"stream-json".to_string()));
        assert_eq!(args.last().unwrap(), "do the thing");
        assert_eq!(args[args.len() - 2], "-p");
    }

    #[test]
    fn profile_a_resume_uses_resume_flag() {
        let backend = ProfileABackend::new();
        let mut r = req(Uuid::nil());
        r.resume = true;
        let cmd = backend.build_command(&r);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"--resume".to_string()));
        assert!(!args.contains(&"--session-id".to_string()));
    }

    #[test]
    fn profile_a_includes_inline_mcp_config_when_present() {
        let backend = ProfileABackend::new();
        let mut r = req(Uuid::nil());
        r.mcp_config_inline = Some("{\"mcpServers\":{}}");
        let cmd = backend.build_command(&r);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"--mcp-config".to_string()));
    }

    #[test]
    fn profile_b_fresh_run_passes_prompt_positionally() {
        let backend = ProfileBBackend::new().with_model("gpt-5");
        let cmd = backend.build_command(&req(Uuid::nil()));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[0], "run");
        assert!(args.contains(&"-m".to_string()));
        assert!(args.contains(&"gpt-5".to_string()));
        assert_eq!(args.last().unwrap(), "do the thing");
    }

    #[test]
    fn profile_b_resume_uses_continuation_flag_and_drops_prompt() {
        let backend = ProfileBBackend::new();
        let mut r = req(Uuid::nil());
        r.resume = true;
        let cmd = backend.build_command(&r);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"-c".to_string()));
        assert!(!args.contains(&"do the thing".to_string()));
    }

    #[test]
    fn registry_resolves_by_executor_type() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(
            registry.get_by_type(ExecutorType::ProfileA).unwrap().name(),
            "profile-a"
        );
        assert_eq!(
            registry.get_by_type(ExecutorType::ProfileB).unwrap().name(),
            "profile-b"
        );
    }

    #[tokio::test]
    async fn profile_a_spawn_rejects_missing_workdir() {
        let backend = ProfileABackend::new();
        let mut r = req(Uuid::nil());
        r.workdir = Path::new("/nonexistent/path/12345");
        assert!(backend.spawn(&r).await.is_err());
    }
}
