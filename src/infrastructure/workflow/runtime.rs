//! Shared state behind a workflow instance

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, RwLock};

use super::engine::EngineConfig;
use super::registry::WorkflowRegistry;
use crate::domain::{
    AgentExecutor, Integration, IntegrationBinding, OutputMessage, ValidationRegistry,
    WorkflowDefinition, WorkflowError,
};

/// Agents available to workflow steps, keyed by agent ID
pub type AgentMap = HashMap<u32, Arc<dyn AgentExecutor>>;

/// Integrations available to workflows, keyed by integration name
pub type IntegrationMap = HashMap<String, Arc<dyn Integration>>;

/// Collaborators and settings bound into every workflow built from one configuration
#[derive(Clone)]
pub struct WorkflowDependencies {
    pub agents: Arc<AgentMap>,
    pub integrations: Arc<IntegrationMap>,
    pub validations: Arc<ValidationRegistry>,
    pub config: EngineConfig,
}

impl WorkflowDependencies {
    /// Dependencies with the built-in validators and default engine settings
    pub fn new(agents: AgentMap, integrations: IntegrationMap) -> Self {
        Self {
            agents: Arc::new(agents),
            integrations: Arc::new(integrations),
            validations: Arc::new(ValidationRegistry::with_builtins()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_validations(mut self, validations: ValidationRegistry) -> Self {
        self.validations = Arc::new(validations);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for WorkflowDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDependencies")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("integrations", &self.integrations.keys().collect::<Vec<_>>())
            .field("validations", &self.validations)
            .field("config", &self.config)
            .finish()
    }
}

/// An output binding and the channel its integration consumes
#[derive(Debug, Clone)]
pub(super) struct OutputRoute {
    pub binding: IntegrationBinding,
    pub channel: Option<mpsc::Sender<OutputMessage>>,
}

/// Identity of a workflow on a sub-workflow call chain
///
/// Both ID and name take part in equality, so a workflow named `X` and an unnamed
/// workflow with ID `X` stay distinct. Displays as the workflow's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct WorkflowKey {
    id: String,
    name: String,
}

impl fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.id)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Read-mostly state shared by every invocation of one workflow
///
/// The definition and collaborator maps never change after construction. Only the
/// registry reference and output routes are installed later, during wiring.
pub struct WorkflowRuntime {
    pub(super) definition: WorkflowDefinition,
    pub(super) agents: Arc<AgentMap>,
    pub(super) integrations: Arc<IntegrationMap>,
    pub(super) validations: Arc<ValidationRegistry>,
    pub(super) config: EngineConfig,
    registry: RwLock<Weak<WorkflowRegistry>>,
    outputs: RwLock<Vec<OutputRoute>>,
}

impl WorkflowRuntime {
    pub(super) fn new(
        definition: WorkflowDefinition,
        deps: WorkflowDependencies,
    ) -> Result<Self, WorkflowError> {
        definition.validate()?;

        // One route per output binding; channels arrive with trigger registration
        let routes = definition
            .outputs()
            .iter()
            .map(|binding| OutputRoute {
                binding: binding.clone(),
                channel: None,
            })
            .collect();

        Ok(Self {
            definition,
            agents: deps.agents,
            integrations: deps.integrations,
            validations: deps.validations,
            config: deps.config,
            registry: RwLock::new(Weak::new()),
            outputs: RwLock::new(routes),
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Key used to detect a workflow re-entering its own call chain
    pub(super) fn lineage_key(&self) -> WorkflowKey {
        WorkflowKey {
            id: self.definition.id().to_string(),
            name: self.definition.name().to_string(),
        }
    }

    pub(super) async fn set_registry(&self, registry: &Arc<WorkflowRegistry>) {
        *self.registry.write().await = Arc::downgrade(registry);
    }

    /// The installed registry, if it is still alive
    pub(super) async fn registry(&self) -> Option<Arc<WorkflowRegistry>> {
        self.registry.read().await.upgrade()
    }

    pub(super) async fn set_outputs(&self, routes: Vec<OutputRoute>) {
        *self.outputs.write().await = routes;
    }

    pub(super) async fn outputs(&self) -> Vec<OutputRoute> {
        self.outputs.read().await.clone()
    }
}

impl fmt::Debug for WorkflowRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("workflow", &self.definition.display_name())
            .field("steps", &self.definition.step_count())
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("integrations", &self.integrations.keys().collect::<Vec<_>>())
            .finish()
    }
}
