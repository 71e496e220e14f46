use std::path::PathBuf;

use clap::{Parser, Subcommand};
use generic_agent_server::commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a config.toml; defaults to the per-user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent server (the default)
    Agent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Agent) {
        Commands::Agent => commands::agent::run(cli.config.as_deref()).await?,
    }

    Ok(())
}
