//! `taskloom start [--count N] [<taskID>...] [--module M]`: admits ready
//! tasks into fresh worktrees and runs them to completion (spec §4.4).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use taskloom_core::agent::{Backend, ProfileABackend, ProfileBBackend};
use taskloom_core::git::GitRepo;
use taskloom_core::{
    parser, scheduler, AgentStatus, Config, ExecutorType, Status, StatusCallback, Supervisor, TaskId, WorktreeManager,
};
use taskloom_db::Database;

use super::db::DbWriter;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Maximum number of tasks to start (defaults to max_parallel_agents)
    #[arg(long)]
    count: Option<u32>,

    /// Restrict admission to this module
    #[arg(long)]
    module: Option<String>,

    /// Explicit task IDs to start, bypassing the ready-set computation
    task_ids: Vec<String>,
}

fn make_backend(config: &Config) -> Arc<dyn Backend> {
    match config.executor_type {
        ExecutorType::ProfileA => Arc::new(ProfileABackend::new()),
        ExecutorType::ProfileB => {
            let mut backend = ProfileBBackend::new();
            if let Some(model) = &config.opencode_model {
                backend = backend.with_model(model.clone());
            }
            Arc::new(backend)
        }
    }
}

pub async fn run(config: &Config, args: &StartArgs) -> anyhow::Result<()> {
    let plans_root = config.project_root.join("plans");
    let scan = parser::scan_plans_tree(&plans_root)?;
    for failure in &scan.failures {
        eprintln!("warning: {}: {}", failure.path.display(), failure.message);
    }

    let completed: HashSet<TaskId> = scan
        .tasks
        .iter()
        .filter(|t| t.status == Status::Complete)
        .map(|t| t.id.clone())
        .collect();

    let selected: Vec<TaskId> = if !args.task_ids.is_empty() {
        args.task_ids
            .iter()
            .filter_map(|s| TaskId::parse(s))
            .collect()
    } else {
        let limit = args.count.unwrap_or(config.max_parallel_agents) as usize;
        let ready = scheduler::get_ready_tasks(&scan.tasks, &completed, limit);
        ready
            .into_iter()
            .filter(|t| args.module.as_deref().map(|m| m == t.id.module).unwrap_or(true))
            .map(|t| t.id.clone())
            .collect()
    };

    if selected.is_empty() {
        println!("No ready tasks to start.");
        return Ok(());
    }

    let db = Arc::new(Database::with_path(config.database_path.clone()).await?);
    db.migrate().await?;

    let repo = GitRepo::open(&config.project_root)?;
    let worktree_manager = WorktreeManager::new(repo, config.worktree_dir.clone());
    let backend = make_backend(config);

    let callback: StatusCallback = Arc::new(|run, status, error| {
        let error = error.map(|e| format!(" ({})", e)).unwrap_or_default();
        println!("[{}] {:?}{}", run.task_id, status, error);
    });

    let writer: Arc<dyn taskloom_core::StoreWriter> = Arc::new(DbWriter::new(db.clone()));

    let supervisor = Supervisor::new(backend, writer, config.max_parallel_agents, 64, callback);

    let non_terminal = taskloom_db::repos::AgentRunRepository::new(db.pool())
        .find_non_terminal()
        .await?;
    if !non_terminal.is_empty() {
        let rows: Vec<_> = non_terminal.iter().map(super::db::row_to_recovered).collect();
        let recovered = supervisor.recover(rows).await;
        for (task_id, status) in &recovered {
            println!("recovered {}: {:?}", task_id, status);
        }
    }

    let mut started = Vec::new();
    for task_id in &selected {
        let task = scan.tasks.iter().find(|t| &t.id == task_id);
        let prompt = task.map(|t| t.description.clone()).unwrap_or_default();
        let prompt = if prompt.is_empty() {
            format!("Work on {}", task_id)
        } else {
            prompt
        };

        let worktree_path = match worktree_manager.create(task_id) {
            Ok(path) => path,
            Err(e) => {
                eprintln!("worktree error for {}: {}", task_id, e);
                continue;
            }
        };

        supervisor.enqueue(task_id.clone(), worktree_path).await;
        if let Err(e) = supervisor.start(task_id, &prompt).await {
            eprintln!("failed to start {}: {}", task_id, e);
            continue;
        }
        started.push(task_id.clone());
    }

    if started.is_empty() {
        println!("No tasks were started.");
        return Ok(());
    }

    println!("Started {} task(s).", started.len());

    loop {
        let mut all_terminal = true;
        for task_id in &started {
            if let Some(run) = supervisor.snapshot(task_id).await {
                if matches!(run.status, AgentStatus::Queued | AgentStatus::Running) {
                    all_terminal = false;
                }
            }
        }
        if all_terminal {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    Ok(())
}
