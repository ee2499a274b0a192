//! `taskloom pr review|merge`: PR creation/merge is an external
//! collaborator the core does not implement (spec §1 Out of scope). These
//! subcommands exist only so the CLI surface matches the documented
//! interface; they report that no PR backend is wired in.

use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct PrArgs {
    #[command(subcommand)]
    pub action: PrAction,
}

#[derive(Subcommand, Debug)]
pub enum PrAction {
    /// Review the open pull request for a task's branch
    Review,
    /// Merge the pull request for a task
    Merge { task_id: String },
}

pub fn run(action: &PrAction) -> anyhow::Result<()> {
    match action {
        PrAction::Review => {
            anyhow::bail!("pr review requires an external PR backend, which this build does not include")
        }
        PrAction::Merge { task_id } => {
            anyhow::bail!(
                "pr merge {} requires an external PR backend, which this build does not include",
                task_id
            )
        }
    }
}
