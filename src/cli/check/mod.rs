//! Check command - builds every workflow and reports reference problems

use std::path::PathBuf;

use clap::Args;
use tracing::error;

use crate::domain::ValidationRegistry;
use crate::infrastructure::workflow::IntegrationMap;

/// Arguments for the check command
#[derive(Args, Clone)]
pub struct CheckArgs {
    /// Extra configuration file layered over config/default and config/local
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Build the registry, then list workflows and validators or fail on the first problem found
pub async fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = super::bootstrap(args.config.as_ref())?;
    let registry = crate::build_registry(&config, IntegrationMap::new()).await?;

    let unresolved = registry.unresolved_references();
    for (workflow, reference) in &unresolved {
        error!(workflow = %workflow, reference = %reference, "Unknown sub-workflow reference");
    }

    registry.detect_cycles()?;

    if !unresolved.is_empty() {
        anyhow::bail!("{} unresolved sub-workflow reference(s)", unresolved.len());
    }

    println!("Workflows:");
    for (name, workflow) in registry.iter() {
        let definition = workflow.definition();
        let marker = if definition.is_default() { " (default)" } else { "" };
        println!(
            "  {}{} [{}] - {} step(s)",
            name,
            marker,
            definition.id(),
            definition.step_count()
        );
    }

    println!("Validation functions:");
    for name in ValidationRegistry::with_builtins().names() {
        println!("  {}", name);
    }

    registry.stop_all();
    Ok(())
}
