//! `taskloom logs <taskID>`: tail the on-disk agent log for the most
//! recent run of a task (spec §6 "Log files at `<worktree>/.agent.log`").

use clap::Args;
use taskloom_core::Config;
use taskloom_db::repos::AgentRunRepository;
use taskloom_db::Database;

#[derive(Args, Debug)]
pub struct LogsArgs {
    task_id: String,

    /// Number of trailing lines to print
    #[arg(short = 'n', long, default_value_t = 200)]
    lines: usize,
}

pub async fn run(config: &Config, args: &LogsArgs) -> anyhow::Result<()> {
    let db = Database::with_path(config.database_path.clone()).await?;
    db.migrate().await?;

    let repo = AgentRunRepository::new(db.pool());
    let runs = repo.find_by_task(&args.task_id, 1).await?;
    let Some(run) = runs.into_iter().next() else {
        anyhow::bail!("no agent run recorded for {}", args.task_id);
    };

    let contents = std::fs::read_to_string(&run.log_path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", run.log_path, e))?;

    let all_lines: Vec<&str> = contents.lines().collect();
    let start = all_lines.len().saturating_sub(args.lines);
    for line in &all_lines[start..] {
        println!("{}", line);
    }

    Ok(())
}
