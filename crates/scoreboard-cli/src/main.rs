use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = scoreboard_cli::Cli::parse();
    scoreboard_cli::init_tracing(cli.log_level());
    scoreboard_cli::run_cli(cli)
}
