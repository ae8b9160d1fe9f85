#![forbid(unsafe_code)]

mod cli;
mod commands;
mod ebpf_metrics;
mod reload;
mod shutdown;
mod startup;

use anyhow::Result;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("xfrmgate-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Command::Validate) => commands::cmd_validate(&cli.config),
        Some(Command::SelectKey { local, peer }) => commands::cmd_select_key(local, peer),
        // No subcommand = run the agent daemon
        Some(Command::Run) | None => startup::run(&cli).await,
    }
}
