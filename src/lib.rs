//! PMP Workflow Engine
//!
//! Runs configured workflows: ordered chains of agent, integration and sub-workflow
//! steps, re-run until their validation functions pass. Workflows are started by
//! integration triggers or directly, and deliver their final result to output
//! integrations.

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use domain::ValidationRegistry;
use infrastructure::agent::agents_from_config;
use infrastructure::workflow::{IntegrationMap, WorkflowDependencies, WorkflowRegistry};
use tracing::info;

/// Dependencies for every workflow in `config`, with chat agents built from its agent list
pub fn create_dependencies(
    config: &AppConfig,
    integrations: IntegrationMap,
) -> anyhow::Result<WorkflowDependencies> {
    let agents = agents_from_config(&config.agents)?;
    info!(
        agents = agents.len(),
        integrations = integrations.len(),
        "Workflow dependencies created"
    );

    Ok(WorkflowDependencies::new(agents, integrations)
        .with_validations(ValidationRegistry::with_builtins())
        .with_config(config.engine.clone()))
}

/// Build and wire every configured workflow
pub async fn build_registry(
    config: &AppConfig,
    integrations: IntegrationMap,
) -> anyhow::Result<Arc<WorkflowRegistry>> {
    let deps = create_dependencies(config, integrations)?;
    let registry = WorkflowRegistry::build(config.workflows.clone(), deps).await?;
    Ok(registry)
}
