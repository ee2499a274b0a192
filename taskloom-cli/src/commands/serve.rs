//! `taskloom serve [--port P]`: the HTTP/SSE dashboard is an external
//! front end (spec §1 Out of scope); this subcommand exists for CLI
//! surface parity and reports that no dashboard is wired into this build.

use clap::Args;
use taskloom_core::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long)]
    port: Option<u16>,
}

pub fn run(config: &Config, args: &ServeArgs) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(config.web.port);
    anyhow::bail!(
        "serve (HTTP dashboard on {}:{}) is an external front end not included in this build",
        config.web.host,
        port
    )
}
