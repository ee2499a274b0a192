//! `taskloom status`: summary counts plus currently-running agents
//! (spec §8 scenario S1: "N total, M complete").

use taskloom_core::{Config, Status};
use taskloom_db::repos::{AgentRunRepository, TaskRepository};
use taskloom_db::Database;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let db = Database::with_path(config.database_path.clone()).await?;
    db.migrate().await?;

    let tasks = TaskRepository::new(db.pool()).all().await?;
    let total = tasks.len();
    let complete = tasks
        .iter()
        .filter(|t| Status::normalize(&t.status) == Status::Complete)
        .count();

    println!("{} total, {} complete", total, complete);

    let running = AgentRunRepository::new(db.pool()).find_running().await?;
    if running.is_empty() {
        println!("No running agents.");
    } else {
        println!();
        println!("Running agents:");
        for run in &running {
            let pid = run.pid.unwrap_or(0);
            let alive = process_is_alive(pid);
            let started = run
                .started_at
                .map(|t| format_duration((chrono::Utc::now() - t).num_seconds()))
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  {} [pid {}{}] started {} ago",
                run.task_id,
                pid,
                if alive { "" } else { ", not found" },
                started
            );
        }
    }

    Ok(())
}

fn process_is_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    taskloom_core::supervisor::process_is_alive(pid as u32)
}

/// Human-readable duration, matching the precision the teacher used for
/// worktree/agent age reporting.
fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = seconds / 86400;
        let hours = (seconds % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}
