//! Workflow execution engine

mod engine;
mod instance;
mod registry;
mod runtime;
mod step_executor;
mod sub_workflow;

pub use engine::EngineConfig;
pub use instance::Workflow;
pub use registry::WorkflowRegistry;
pub use runtime::{AgentMap, IntegrationMap, WorkflowDependencies, WorkflowRuntime};
