use clap::Parser;
use pmp_session_cache::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cli::serve::run().await,
        Command::Cache(command) => cli::cache::run(command).await,
    }
}
