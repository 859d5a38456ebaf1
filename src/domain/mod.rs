//! Domain layer - Core workflow types and collaborator contracts

pub mod agent;
pub mod error;
pub mod integration;
pub mod validation;
pub mod workflow;

pub use agent::{AgentExecutor, DiffSettings, PromptInput};
pub use error::DomainError;
pub use integration::{Integration, OutputMessage, OutputPayload, TriggerMessage};
pub use validation::{ResolvedValidation, ValidationFailure, ValidationFn, ValidationRegistry};
pub use workflow::{
    ExecutionContext, IntegrationBinding, OutputField, RetryPolicy, RunFailure, StepDefinition,
    StepKind, StepResult, StepResults, StepSource, WorkflowDefinition, WorkflowError,
    FINAL_STEP_ID,
};
