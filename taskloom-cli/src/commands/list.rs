//! `taskloom list [--module M] [--status S]`: tabular view of the store.

use clap::Args;
use taskloom_core::{Config, Status};
use taskloom_db::repos::TaskRepository;
use taskloom_db::Database;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Restrict to tasks in this module
    #[arg(long)]
    module: Option<String>,

    /// Restrict to tasks in this status (not_started, in_progress, complete)
    #[arg(long)]
    status: Option<String>,
}

pub async fn run(config: &Config, args: &ListArgs) -> anyhow::Result<()> {
    let db = Database::with_path(config.database_path.clone()).await?;
    db.migrate().await?;

    let repo = TaskRepository::new(db.pool());
    let mut rows = match (&args.module, &args.status) {
        (Some(module), _) => repo.find_by_module(module).await?,
        (None, Some(status)) => {
            let normalized = Status::normalize(status);
            repo.find_by_status(normalized.as_str()).await?
        }
        (None, None) => repo.all().await?,
    };

    if let Some(status) = &args.status {
        if args.module.is_some() {
            let normalized = Status::normalize(status).as_str().to_string();
            rows.retain(|r| r.status == normalized);
        }
    }

    if rows.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    for row in rows {
        println!(
            "{:<24} {:<12} {:<8} {}",
            row.task_id, row.status, row.priority, row.title
        );
    }

    Ok(())
}
