//! Workflow error types

use thiserror::Error;

use super::context::StepResults;

/// Errors that can occur while building or executing a workflow
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    #[error("Duplicate step ID in workflow '{workflow}': {step}")]
    DuplicateStep { workflow: String, step: String },

    #[error("Workflow has no steps: {0}")]
    EmptyWorkflow(String),

    #[error("Agent with ID {0} not found")]
    AgentNotFound(u32),

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Workflow not found: {0}")]
    SubWorkflowNotFound(String),

    #[error("Cyclic workflow reference: {0}")]
    CyclicWorkflowReference(String),

    #[error("Sub-workflow nesting exceeds maximum depth of {max_depth} at '{workflow}'")]
    MaxNestingDepth { workflow: String, max_depth: usize },

    #[error("Step execution failed in '{step}': {message}")]
    StepExecution { step: String, message: String },

    #[error("Validation failed in step '{step}': {reason}")]
    PassthroughRejected { step: String, reason: String },

    #[error("Integration '{integration}' returned a non-string response")]
    InvalidIntegrationResponse { integration: String },

    #[error("Sub-workflow {workflow} failed after {attempts} attempts: {cause}")]
    SubWorkflowExhausted {
        workflow: String,
        attempts: u32,
        cause: String,
    },

    #[error("validation of workflow results failed")]
    ValidationExhausted { attempts: u32 },

    #[error("Timeout in step '{step}' after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },
}

impl WorkflowError {
    pub fn invalid_step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn duplicate_step(workflow: impl Into<String>, step: impl Into<String>) -> Self {
        Self::DuplicateStep {
            workflow: workflow.into(),
            step: step.into(),
        }
    }

    pub fn empty_workflow(id: impl Into<String>) -> Self {
        Self::EmptyWorkflow(id.into())
    }

    pub fn agent_not_found(id: u32) -> Self {
        Self::AgentNotFound(id)
    }

    pub fn integration_not_found(name: impl Into<String>) -> Self {
        Self::IntegrationNotFound(name.into())
    }

    pub fn sub_workflow_not_found(reference: impl Into<String>) -> Self {
        Self::SubWorkflowNotFound(reference.into())
    }

    pub fn cyclic_reference(chain: impl Into<String>) -> Self {
        Self::CyclicWorkflowReference(chain.into())
    }

    pub fn max_nesting_depth(workflow: impl Into<String>, max_depth: usize) -> Self {
        Self::MaxNestingDepth {
            workflow: workflow.into(),
            max_depth,
        }
    }

    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn passthrough_rejected(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PassthroughRejected {
            step: step.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_integration_response(integration: impl Into<String>) -> Self {
        Self::InvalidIntegrationResponse {
            integration: integration.into(),
        }
    }

    pub fn sub_workflow_exhausted(
        workflow: impl Into<String>,
        attempts: u32,
        cause: impl Into<String>,
    ) -> Self {
        Self::SubWorkflowExhausted {
            workflow: workflow.into(),
            attempts,
            cause: cause.into(),
        }
    }

    pub fn validation_exhausted(attempts: u32) -> Self {
        Self::ValidationExhausted { attempts }
    }

    pub fn timeout(step: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            step: step.into(),
            timeout_ms,
        }
    }

    /// Whether this error was raised while building the workflow rather than running it
    pub fn is_construction_error(&self) -> bool {
        matches!(self, Self::InvalidStep { .. } | Self::DuplicateStep { .. })
    }
}

/// A failed validation-retry run, with whatever step results were produced before the failure
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: WorkflowError,
    pub results: StepResults,
}

impl RunFailure {
    pub fn new(error: WorkflowError, results: StepResults) -> Self {
        Self { error, results }
    }
}

impl From<WorkflowError> for RunFailure {
    fn from(error: WorkflowError) -> Self {
        Self::new(error, StepResults::default())
    }
}
