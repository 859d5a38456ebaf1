//! CLI module for the PMP workflow engine
//!
//! - `run`: execute one workflow against a prompt
//! - `check`: build every configured workflow and report reference problems

pub mod check;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// PMP Workflow Engine - chains agents, integrations and sub-workflows
#[derive(Parser)]
#[command(name = "pmp-workflow-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a workflow directly and print its final output
    Run(run::RunArgs),

    /// Validate the configured workflows without running them
    Check(check::CheckArgs),
}

/// Load `.env`, layered configuration and logging for a subcommand
fn bootstrap(config_path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(config_path.map(PathBuf::as_path))?;
    logging::init_logging(&config.logging);

    Ok(config)
}
