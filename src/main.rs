use clap::Parser;
use pmp_workflow_engine::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cli::run::run(args).await,
        Command::Check(args) => cli::check::run(args).await,
    }
}
