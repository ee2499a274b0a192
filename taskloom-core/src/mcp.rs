//! MCP (Model Context Protocol) configuration generation (spec §6).
//!
//! If the project root carries its own MCP-config file, those server
//! entries travel through to the child executor. An optional
//! orchestrator-owned "build-pool" entry is merged in when a build-pool
//! URL is configured and the helper binary can be found. Profile A takes
//! the merged config inline on its command line; Profile B reads its
//! config from a file, in its own schema, so entries are rewritten before
//! being written out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::agent::ExecutorType;
use crate::{Error, Result};

/// Project-level MCP settings the supervisor needs at `Start`/`Resume`
/// time to build an executor's argument vector or environment.
#[derive(Debug, Clone)]
pub struct McpOptions {
    pub project_root: PathBuf,
    pub build_pool_url: Option<String>,
    pub executor_type: ExecutorType,
}

/// Filename the project's own MCP servers are configured under.
pub const PROJECT_MCP_CONFIG_FILE: &str = ".mcp.json";

/// Environment variable naming the build-pool helper binary (spec §6
/// "Build-helper binary path (one variable); executable-relative and PATH
/// fallbacks").
pub const BUILD_POOL_HELPER_ENV: &str = "TASKLOOM_BUILD_POOL_HELPER";

/// The helper binary name looked for next to the running executable and
/// on `PATH` when the environment variable is unset.
const BUILD_POOL_HELPER_NAME: &str = "taskloom-build-pool";

/// Name the build-pool entry is merged in under.
const BUILD_POOL_SERVER_NAME: &str = "build-pool";

/// Environment variable Profile B is invoked with, pointing at the
/// converted config file written into the task's worktree.
pub const PROFILE_B_CONFIG_ENV: &str = "TASKLOOM_MCP_CONFIG";

/// One entry of an `mcpServers` map in the project's own (Profile-A-like)
/// schema.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct McpServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Read `mcpServers` from `<project_root>/.mcp.json`. A missing file is
/// not an error; it just means the project declares no MCP servers.
pub fn read_project_mcp_config(project_root: &Path) -> Result<Map<String, Value>> {
    let path = project_root.join(PROJECT_MCP_CONFIG_FILE);
    if !path.exists() {
        return Ok(Map::new());
    }
    let contents = std::fs::read_to_string(&path).map_err(Error::Io)?;
    let doc: Value = serde_json::from_str(&contents)?;
    Ok(doc
        .get("mcpServers")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default())
}

/// Locate the build-pool helper binary: the configured environment
/// variable first, then a binary next to the running executable, then a
/// `PATH` search. `None` if nothing resolves.
pub fn find_build_pool_helper() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(BUILD_POOL_HELPER_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(BUILD_POOL_HELPER_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(BUILD_POOL_HELPER_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Merge the optional build-pool entry into `servers`. Added only when a
/// URL is configured and the helper binary resolves; otherwise `servers`
/// passes through unchanged.
pub fn merge_build_pool_entry(mut servers: Map<String, Value>, build_pool_url: Option<&str>) -> Map<String, Value> {
    let Some(url) = build_pool_url else {
        return servers;
    };
    let Some(helper) = find_build_pool_helper() else {
        return servers;
    };

    servers.insert(
        BUILD_POOL_SERVER_NAME.to_string(),
        serde_json::json!({
            "command": helper.to_string_lossy(),
            "args": ["--url", url],
            "env": {},
        }),
    );
    servers
}

/// Build the merged `mcpServers` map for a project, folding in the
/// build-pool entry when configured. Shared by both profiles; Profile B
/// runs the result through [`rewrite_for_profile_b`] afterward.
pub fn build_merged_config(project_root: &Path, build_pool_url: Option<&str>) -> Result<Map<String, Value>> {
    let servers = read_project_mcp_config(project_root)?;
    Ok(merge_build_pool_entry(servers, build_pool_url))
}

/// Profile A's `--mcp-config` value: the merged config as inline JSON, or
/// `None` when there is nothing to pass.
pub fn inline_config_for_profile_a(project_root: &Path, build_pool_url: Option<&str>) -> Result<Option<String>> {
    let servers = build_merged_config(project_root, build_pool_url)?;
    if servers.is_empty() {
        return Ok(None);
    }
    let doc = serde_json::json!({ "mcpServers": Value::Object(servers) });
    Ok(Some(serde_json::to_string(&doc)?))
}

/// Rewrite each entry into Profile B's schema: `type` is `"local"`,
/// `command` becomes an array (binary followed by its args), and `env`
/// is renamed `environment`.
pub fn rewrite_for_profile_b(servers: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, entry) in servers {
        let command = entry.get("command").and_then(Value::as_str).unwrap_or_default();
        let args: Vec<Value> = entry.get("args").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut command_vec = vec![Value::String(command.to_string())];
        command_vec.extend(args);

        let environment = entry.get("env").cloned().unwrap_or_else(|| Value::Object(Map::new()));

        out.insert(
            name.clone(),
            serde_json::json!({
                "type": "local",
                "command": command_vec,
                "environment": environment,
            }),
        );
    }
    out
}

/// Write Profile B's converted MCP config into the task's worktree and
/// return the environment variable/path pair to pass to the child. `None`
/// when there is nothing to configure.
pub fn write_profile_b_config(
    worktree_path: &Path,
    project_root: &Path,
    build_pool_url: Option<&str>,
) -> Result<Option<(&'static str, PathBuf)>> {
    let servers = build_merged_config(project_root, build_pool_url)?;
    if servers.is_empty() {
        return Ok(None);
    }

    let rewritten = rewrite_for_profile_b(&servers);
    let doc = serde_json::json!({ "mcpServers": Value::Object(rewritten) });

    let config_path = worktree_path.join(".mcp-profile-b.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&doc)?).map_err(Error::Io)?;

    Ok(Some((PROFILE_B_CONFIG_ENV, config_path)))
}
