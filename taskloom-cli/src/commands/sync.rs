//! `taskloom sync`: reconcile the markdown plans tree against the store
//! (spec §4.5 `TwoWaySync`).

use std::sync::Arc;

use taskloom_core::sync::{two_way_sync, MemoryStore, TaskStore};
use taskloom_core::{parser, Config};
use taskloom_db::Database;

use super::db;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let plans_root = config.project_root.join("plans");
    let scan = parser::scan_plans_tree(&plans_root)?;

    for failure in &scan.failures {
        eprintln!("warning: {}: {}", failure.path.display(), failure.message);
    }

    let db = Arc::new(Database::with_path(config.database_path.clone()).await?);
    db.migrate().await?;

    let mut store = MemoryStore::new();
    for task in db::load_all_tasks(&db).await? {
        store.upsert(&task)?;
    }

    let report = two_way_sync(&mut store, &scan.tasks)?;

    for id in &report.imported {
        if let Some(task) = scan.tasks.iter().find(|t| &t.id == id) {
            let repo = taskloom_db::repos::TaskRepository::new(db.pool());
            repo.upsert(&db::task_to_row(task)?).await?;
        }
    }

    // `two_way_sync` already rewrote each written-back task's epic file;
    // here we only re-point its README row to the store's status.
    let readme_path = config.project_root.join("README.md");
    if !report.written_back.is_empty() && readme_path.exists() {
        let original = std::fs::read_to_string(&readme_path)?;
        let mut readme = original.clone();
        for id in &report.written_back {
            if let Some(task) = store.get(id)? {
                readme = taskloom_core::sync::rewrite_readme_status(&readme, id, task.status);
            }
        }
        if readme != original {
            std::fs::write(&readme_path, readme)?;
        }
    }

    if !report.conflicts.is_empty() {
        println!("{} conflict(s) detected (neither side written):", report.conflicts.len());
        for conflict in &report.conflicts {
            println!(
                "  {}: markdown={} store={}",
                conflict.id, conflict.markdown_status, conflict.store_status
            );
        }
    }

    println!("Synced {} tasks", scan.tasks.len());
    Ok(())
}
