//! taskloom CLI - command-line entry point for the task orchestrator.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskloom_core::{CliOverrides, Config, Error as CoreError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{ListArgs, LogsArgs, PrAction, PrArgs, ServeArgs, StartArgs};

/// taskloom: autonomous orchestration of LLM coding agents over a
/// markdown-defined task backlog.
#[derive(Parser, Debug)]
#[command(name = "taskloom")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (overrides the default location)
    #[arg(long, global = true, env = "TASKLOOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the markdown plans tree against the store
    Sync,
    /// Show a status summary and currently running agents
    Status,
    /// List tasks from the store
    List(ListArgs),
    /// Admit ready tasks and run them to completion
    Start(StartArgs),
    /// Tail a task's agent log
    Logs(LogsArgs),
    /// Pull-request review/merge (requires an external PR backend)
    Pr(PrArgs),
    /// Run the HTTP dashboard (external front end, not included)
    Serve(ServeArgs),
    /// Run the terminal dashboard (external front end, not included)
    Tui,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_USER_ERROR: i32 = 1;
const EXIT_INTERNAL_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::load_with_overrides(cli.config.as_ref(), CliOverrides::default()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(EXIT_USER_ERROR);
        }
    };

    if cli.verbose {
        tracing::info!(?config, "configuration loaded");
    }

    let result = dispatch(&config, cli.command).await;

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(classify(&e));
        }
    }
}

async fn dispatch(config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sync => commands::sync::run(config).await,
        Commands::Status => commands::status::run(config).await,
        Commands::List(args) => commands::list::run(config, &args).await,
        Commands::Start(args) => commands::start::run(config, &args).await,
        Commands::Logs(args) => commands::logs::run(config, &args).await,
        Commands::Pr(args) => commands::pr::run(&args.action),
        Commands::Serve(args) => commands::serve::run(config, &args),
        Commands::Tui => commands::tui::run(),
    }
}

/// User/config errors (bad task IDs, unreadable files, unsupported
/// subcommands) exit 1; anything else is treated as an internal failure.
fn classify(err: &anyhow::Error) -> i32 {
    if let Some(core_err) = err.downcast_ref::<CoreError>() {
        match core_err {
            CoreError::Config(_) | CoreError::Parser(_) => return EXIT_USER_ERROR,
            _ => return EXIT_INTERNAL_ERROR,
        }
    }
    EXIT_USER_ERROR
}
