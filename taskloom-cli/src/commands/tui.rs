//! `taskloom tui`: the terminal dashboard is an external front end
//! (spec §1 Out of scope); this subcommand exists for CLI surface parity
//! and reports that no dashboard is wired into this build.

pub fn run() -> anyhow::Result<()> {
    anyhow::bail!("tui is an external front end not included in this build")
}
