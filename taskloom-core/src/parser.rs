//! Markdown parser: discovers epic files under a plans root, extracts
//! frontmatter + title + body, and computes implicit dependencies
//! (spec §4.1).
//!
//! Filename recognition accepts four families:
//! - `epic-NN-<slug>.md` -> ("", NN)
//! - `NN-epic-<slug>.md` -> ("", NN)
//! - `epic-<letters>-NN-<slug>.md` -> (uppercased letters, NN)
//! - `epic-A.B-<slug>.md` -> ("", B) (phase.epic notation)
//!
//! A file that matches none of these is skipped silently. Malformed YAML
//! inside a frontmatter block that does match is a fatal per-file error;
//! the rest of the scan proceeds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;

use crate::task::{Priority, Status, Task, TaskId, TestSummary};
use crate::{Error, Result};

/// One file that failed to parse, with a human-readable reason. Collected
/// alongside successfully parsed tasks so the scan can continue past
/// individual bad files.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

/// The result of scanning a plans tree: the tasks that parsed, and the
/// files that didn't.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub tasks: Vec<Task>,
    pub failures: Vec<ParseFailure>,
}

#[derive(Debug, Deserialize, Default)]
struct Frontmatter {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    needs_review: bool,
    #[serde(default)]
    github_issue: Option<i64>,
}

/// Recognized filename shape: the (prefix, epic number) pair extracted
/// from the stem, independent of the slug.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FilenameMatch {
    prefix: String,
    epic: u32,
}

/// `ExtractTaskIDFromPath` companion: classify a filename against the four
/// recognized families. Returns `None` for anything else (e.g.
/// `00-overview.md`).
fn match_filename(file_name: &str) -> Option<FilenameMatch> {
    let stem = file_name.strip_suffix(".md")?;

    // epic-<letters>-NN-<slug> (letters must be non-numeric to
    // disambiguate from epic-NN-<slug>).
    if let Some(rest) = stem.strip_prefix("epic-") {
        let mut parts = rest.splitn(3, '-');
        let first = parts.next()?;
        if !first.chars().all(|c| c.is_ascii_digit()) && first.chars().all(|c| c.is_ascii_alphabetic()) {
            let second = parts.next()?;
            if !second.is_empty() && second.chars().all(|c| c.is_ascii_digit()) {
                return Some(FilenameMatch {
                    prefix: first.to_ascii_uppercase(),
                    epic: second.parse().ok()?,
                });
            }
        }
    }

    // epic-A.B-<slug> (phase.epic notation; the minor number is the epic).
    if let Some(rest) = stem.strip_prefix("epic-") {
        let mut parts = rest.splitn(2, '-');
        let first = parts.next()?;
        if let Some((_phase, minor)) = first.split_once('.') {
            if !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()) {
                return Some(FilenameMatch {
                    prefix: String::new(),
                    epic: minor.parse().ok()?,
                });
            }
        }
    }

    // epic-NN-<slug>
    if let Some(rest) = stem.strip_prefix("epic-") {
        let mut parts = rest.splitn(2, '-');
        let first = parts.next()?;
        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            return Some(FilenameMatch {
                prefix: String::new(),
                epic: first.parse().ok()?,
            });
        }
    }

    // NN-epic-<slug>
    let mut parts = stem.splitn(3, '-');
    let first = parts.next()?;
    let second = parts.next()?;
    if second == "epic" && !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
        return Some(FilenameMatch {
            prefix: String::new(),
            epic: first.parse().ok()?,
        });
    }

    None
}

/// `ExtractTaskIDFromPath`: the module is the immediate parent directory
/// (used verbatim, a free-form slug), combined with the filename match.
/// Rejects files that are not recognizable epic names.
pub fn extract_task_id_from_path(path: &Path) -> Option<TaskId> {
    let file_name = path.file_name()?.to_str()?;
    let m = match_filename(file_name)?;
    let module = path.parent()?.file_name()?.to_str()?.to_string();
    Some(TaskId {
        module,
        prefix: m.prefix,
        epic: m.epic,
    })
}

/// Split a `---`-fenced frontmatter block from the very start of `content`.
/// Returns `(frontmatter_yaml, body)`. If the content does not begin with
/// a fence, the whole content is the body and frontmatter is empty.
fn split_frontmatter(content: &str) -> (&str, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return ("", content);
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let Some(end) = rest.find("\n---") else {
        return ("", content);
    };
    let frontmatter = &rest[..end];
    let after_fence = &rest[end + 4..];
    // Consume the rest of the closing-fence line and the newline after it.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    (frontmatter, &after_fence[body_start..])
}

/// The first `# ` heading of the body, or `None` if absent.
fn extract_title(body: &str) -> Option<String> {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(title) = trimmed.strip_prefix("# ") {
            return Some(title.trim().to_string());
        }
    }
    None
}

/// Human slug from a filename: strip `.md`, drop the recognized
/// prefix/number tokens, keep the rest, turn dashes into spaces.
fn slug_title(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".md").unwrap_or(file_name);
    stem.replace(['-', '_'], " ")
}

/// Parse one epic file's contents into a `Task`. `path` is used for the
/// module/id/source_path fields; `content` is the full file text.
pub fn parse_task(path: &Path, content: &str) -> Result<Task> {
    let id = extract_task_id_from_path(path).ok_or_else(|| {
        Error::Parser(format!("{}: not a recognizable epic filename", path.display()))
    })?;

    let (frontmatter_yaml, body) = split_frontmatter(content);
    let frontmatter: Frontmatter = if frontmatter_yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(frontmatter_yaml)
            .map_err(|e| Error::Parser(format!("{}: malformed YAML frontmatter: {}", path.display(), e)))?
    };

    let status = frontmatter
        .status
        .as_deref()
        .map(Status::normalize)
        .unwrap_or(Status::NotStarted);

    let priority = match frontmatter.priority.as_deref().map(str::to_ascii_lowercase) {
        Some(ref s) if s == "high" => Priority::High,
        Some(ref s) if s == "low" => Priority::Low,
        _ => Priority::Normal,
    };

    let depends_on = frontmatter
        .depends_on
        .iter()
        .filter_map(|s| TaskId::parse(s))
        .collect();

    let title = extract_title(body).unwrap_or_else(|| {
        slug_title(path.file_name().and_then(|f| f.to_str()).unwrap_or(""))
    });

    let now = Utc::now();
    Ok(Task {
        id,
        title,
        description: body.trim().to_string(),
        status,
        priority,
        depends_on,
        needs_review: frontmatter.needs_review,
        test_summary: None,
        github_issue: frontmatter.github_issue,
        source_path: path.to_path_buf(),
        created_at: now,
        updated_at: now,
    })
}

/// Re-serialize a task to its epic-file form: frontmatter block + body.
/// Used by the sync engine to write status changes back, and by the
/// round-trip test property.
pub fn serialize_task(task: &Task) -> String {
    let mut fm = String::from("---\n");
    fm.push_str(&format!("status: {}\n", task.status.as_str()));
    fm.push_str(&format!(
        "priority: {}\n",
        match task.priority {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    ));
    if !task.depends_on.is_empty() {
        fm.push_str("depends_on:\n");
        for dep in &task.depends_on {
            fm.push_str(&format!("  - {}\n", dep));
        }
    }
    if task.needs_review {
        fm.push_str("needs_review: true\n");
    }
    if let Some(issue) = task.github_issue {
        fm.push_str(&format!("github_issue: {}\n", issue));
    }
    fm.push_str("---\n\n");

    if !task.description.trim_start().starts_with("# ") {
        fm.push_str(&format!("# {}\n\n", task.title));
    }
    fm.push_str(&task.description);
    fm.push('\n');
    fm
}

/// Discover and parse all epic files under `plans_root`. Unrecognized
/// filenames are skipped silently; malformed frontmatter or unreadable
/// files become `ParseFailure`s without aborting the scan. Dangling
/// `depends_on` entries (invariant (a)) are dropped once the full task
/// set is known.
pub fn scan_plans_tree(plans_root: &Path) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut files = Vec::new();
    collect_markdown_files(plans_root, &mut files)?;

    for path in files {
        if extract_task_id_from_path(&path).is_none() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match parse_task(&path, &content) {
                Ok(task) => result.tasks.push(task),
                Err(e) => result.failures.push(ParseFailure {
                    path,
                    message: e.to_string(),
                }),
            },
            Err(e) => result.failures.push(ParseFailure {
                path,
                message: format!("failed to read file: {}", e),
            }),
        }
    }

    let known_ids: std::collections::HashSet<TaskId> = result.tasks.iter().map(|t| t.id.clone()).collect();
    for task in &mut result.tasks {
        task.depends_on.retain(|d| known_ids.contains(d));
    }

    Ok(result)
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
        let entry = entry.map_err(Error::Io)?;
        let path = entry.path();
        if path.is_dir() {
            collect_markdown_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
    Ok(())
}

/// `ParseReadmeStatuses`: scan a README for table rows linking to plan
/// files, extracting a TaskID -> Status mapping using the emoji legend
/// {🔴 -> not_started, 🟡 -> in_progress, 🟢 -> complete}.
///
/// A row is recognized if it is a markdown table row (`| ... |`) whose
/// cells contain both a link target ending in `.md` (from which the
/// TaskID is derived via `extract_task_id_from_path`) and one of the
/// legend emoji.
pub fn parse_readme_statuses(readme: &str) -> HashMap<TaskId, Status> {
    let mut out = HashMap::new();

    for line in readme.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('|') {
            continue;
        }

        let status = if trimmed.contains('🟢') {
            Status::Complete
        } else if trimmed.contains('🟡') {
            Status::InProgress
        } else if trimmed.contains('🔴') {
            Status::NotStarted
        } else {
            continue;
        };

        let Some(link_start) = trimmed.find("](") else {
            continue;
        };
        let after = &trimmed[link_start + 2..];
        let Some(link_end) = after.find(')') else {
            continue;
        };
        let link = &after[..link_end];
        if !link.ends_with(".md") {
            continue;
        }

        if let Some(id) = extract_task_id_from_path(Path::new(link)) {
            out.insert(id, status);
        }
    }

    out
}

/// Render the emoji legend for one status, for writing README rows back.
pub fn status_emoji(status: Status) -> &'static str {
    match status {
        Status::NotStarted => "🔴",
        Status::InProgress => "🟡",
        Status::Complete => "🟢",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_epic_nn_slug() {
        let m = match_filename("epic-01-bill.md").unwrap();
        assert_eq!(m, FilenameMatch { prefix: String::new(), epic: 1 });
    }

    #[test]
    fn recognizes_nn_epic_slug() {
        let m = match_filename("01-epic-bill.md").unwrap();
        assert_eq!(m, FilenameMatch { prefix: String::new(), epic: 1 });
    }

    #[test]
    fn recognizes_epic_letters_nn_slug() {
        let m = match_filename("epic-CLI-02-tui.md").unwrap();
        assert_eq!(m, FilenameMatch { prefix: "CLI".to_string(), epic: 2 });
    }

    #[test]
    fn recognizes_phase_epic_notation() {
        let m = match_filename("epic-3.4-rollout.md").unwrap();
        assert_eq!(m, FilenameMatch { prefix: String::new(), epic: 4 });
    }

    #[test]
    fn rejects_unrecognized_filename() {
        assert!(match_filename("00-overview.md").is_none());
        assert!(match_filename("README.md").is_none());
    }

    #[test]
    fn extract_task_id_uses_parent_dir_as_module() {
        let id = extract_task_id_from_path(Path::new("billing/epic-01-bill.md")).unwrap();
        assert_eq!(id, TaskId::new("billing", 1));
    }

    #[test]
    fn splits_frontmatter_and_body() {
        let content = "---\nstatus: complete\n---\n# Title\n\nbody text\n";
        let (fm, body) = split_frontmatter(content);
        assert_eq!(fm, "status: complete");
        assert!(body.starts_with("# Title"));
    }

    #[test]
    fn missing_frontmatter_yields_defaults() {
        let content = "# Just a title\n\nno frontmatter here";
        let task = parse_task(Path::new("billing/epic-00-setup.md"), content).unwrap();
        assert_eq!(task.status, Status::NotStarted);
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.title, "Just a title");
    }

    #[test]
    fn malformed_yaml_is_a_parser_error() {
        let content = "---\nstatus: [unterminated\n---\nbody\n";
        let err = parse_task(Path::new("billing/epic-00-setup.md"), content).unwrap_err();
        assert!(matches!(err, Error::Parser(_)));
    }

    #[test]
    fn unrecognized_filename_has_no_task_id() {
        assert!(extract_task_id_from_path(Path::new("plans/00-overview.md")).is_none());
    }

    #[test]
    fn status_normalization_from_frontmatter_variants() {
        for (raw, expected) in [
            ("in_progress", Status::InProgress),
            ("inprogress", Status::InProgress),
            ("in-progress", Status::InProgress),
            ("running", Status::InProgress),
            ("complete", Status::Complete),
            ("completed", Status::Complete),
            ("done", Status::Complete),
            ("anything-else", Status::NotStarted),
        ] {
            let content = format!("---\nstatus: {}\n---\nbody\n", raw);
            let task = parse_task(Path::new("m/epic-00-x.md"), &content).unwrap();
            assert_eq!(task.status, expected, "raw={}", raw);
        }
    }

    #[test]
    fn round_trip_preserves_normalized_status() {
        let content = "---\nstatus: running\npriority: high\n---\n# T\n\nbody\n";
        let task = parse_task(Path::new("m/epic-00-x.md"), content).unwrap();
        let rendered = serialize_task(&task);
        let reparsed = parse_task(Path::new("m/epic-00-x.md"), &rendered).unwrap();
        assert_eq!(reparsed.status, Status::InProgress);
    }

    #[test]
    fn readme_status_round_trip() {
        let readme = "| Task | Status |\n|---|---|\n| [Bill](billing/epic-01-bill.md) | 🟢 |\n";
        let statuses = parse_readme_statuses(readme);
        assert_eq!(statuses.get(&TaskId::new("billing", 1)), Some(&Status::Complete));
    }

    #[test]
    fn readme_status_legend_covers_all_three_states() {
        let readme = "\
| [A](m/epic-00-a.md) | 🔴 |
| [B](m/epic-01-b.md) | 🟡 |
| [C](m/epic-02-c.md) | 🟢 |
";
        let statuses = parse_readme_statuses(readme);
        assert_eq!(statuses.get(&TaskId::new("m", 0)), Some(&Status::NotStarted));
        assert_eq!(statuses.get(&TaskId::new("m", 1)), Some(&Status::InProgress));
        assert_eq!(statuses.get(&TaskId::new("m", 2)), Some(&Status::Complete));
    }

    #[test]
    fn dangling_explicit_dependency_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("billing");
        std::fs::create_dir(&module).unwrap();
        std::fs::write(
            module.join("epic-01-bill.md"),
            "---\nstatus: not_started\ndepends_on:\n  - billing/E99\n---\nbody\n",
        )
        .unwrap();

        let result = scan_plans_tree(dir.path()).unwrap();
        assert_eq!(result.tasks.len(), 1);
        assert!(result.tasks[0].depends_on.is_empty());
    }
}
