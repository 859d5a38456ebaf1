//! Workflow domain module
//!
//! A workflow is a fixed, linear pipeline of steps. Each step invokes one of:
//! - an agent (LLM generation with tools)
//! - an integration event
//! - another workflow, retried under the step's retry policy
//!
//! Each step sees the previous step's content. The last step's content, once every
//! configured validation function accepts it, becomes the `final` result.

mod context;
mod entity;
mod error;
pub mod output;
mod step_types;

pub use context::{ExecutionContext, StepResult, StepResults, StepSource, FINAL_STEP_ID};
pub use entity::WorkflowDefinition;
pub use error::{RunFailure, WorkflowError};
pub use output::{extract_reasoning, process_output, OutputField};
pub use step_types::{IntegrationBinding, RetryPolicy, StepDefinition, StepKind, StepSettings};
