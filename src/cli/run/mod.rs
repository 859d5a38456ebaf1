//! Run command - executes one workflow against a prompt

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use crate::infrastructure::workflow::IntegrationMap;

/// Arguments for the run command
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Workflow to run, by name or ID; the default workflow when omitted
    #[arg(long, short)]
    pub workflow: Option<String>,

    /// Prompt handed to the first step
    #[arg(long, short)]
    pub prompt: String,

    /// Extra configuration file layered over config/default and config/local
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Run a workflow and print its final content (or the fallback message)
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = super::bootstrap(args.config.as_ref())?;
    let registry = crate::build_registry(&config, IntegrationMap::new()).await?;

    let workflow = match args.workflow.as_deref() {
        Some(reference) => registry
            .resolve(reference)
            .with_context(|| format!("Unknown workflow: {}", reference))?,
        None => registry
            .default_workflow()
            .context("No workflow given and none is marked as default")?,
    };

    info!(workflow = %workflow.name(), "Running workflow");
    let output = workflow.execute(args.prompt.as_str()).await;
    println!("{}", output);

    registry.stop_all();
    Ok(())
}
