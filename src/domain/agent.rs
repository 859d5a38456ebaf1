//! Agent executor collaborator

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Input handed to an agent for one generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInput {
    pub message: String,
}

impl PromptInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Whether an agent's output should be applied as a unified diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSettings {
    pub enabled: bool,
}

/// An LLM-backed agent that workflow steps invoke
///
/// Agents carry mutable per-call state (prompt context), so the engine never calls a
/// shared agent directly: every step works on its own `clone_agent()` copy.
#[async_trait]
pub trait AgentExecutor: Send + Sync + Debug {
    /// Exclusive copy for one step
    fn clone_agent(&self) -> Box<dyn AgentExecutor>;

    /// Content from the previous step, prepended to the agent's prompt
    fn set_prompt_context(&mut self, context: &str);

    /// Generate a response, letting the agent call its tools
    async fn generate_with_tools(&self, path: &str, input: &PromptInput)
        -> Result<String, DomainError>;

    fn diff_settings(&self) -> DiffSettings {
        DiffSettings::default()
    }

    /// Apply generated content as a patch to the agent's working tree
    async fn apply_generated_patch(&self, content: &str) -> Result<(), DomainError>;
}
