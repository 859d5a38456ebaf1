//! Single-step dispatch for agent and integration steps

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use super::runtime::{WorkflowKey, WorkflowRuntime};
use crate::domain::workflow::output::{invalid_reason, process_output};
use crate::domain::{
    ExecutionContext, IntegrationBinding, PromptInput, StepDefinition, StepKind, StepResult,
    StepSource, WorkflowError,
};

impl WorkflowRuntime {
    /// Execute one step against the run's context and the previous step's result
    pub(super) async fn execute_step(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        previous: Option<&StepResult>,
        lineage: &[WorkflowKey],
    ) -> Result<StepResult, WorkflowError> {
        debug!(
            workflow = %self.definition.display_name(),
            step = %step.id(),
            kind = step.kind().type_name(),
            "Executing step"
        );

        match step.kind() {
            StepKind::Agent {
                agent_id,
                inline_input,
                ..
            } => {
                let fut = self.execute_agent_step(
                    step,
                    *agent_id,
                    inline_input.as_deref(),
                    ctx,
                    previous,
                );
                self.with_deadline(step.id(), fut).await
            }
            StepKind::Integration(binding) => {
                let fut = self.execute_integration_step(step, binding, ctx, previous);
                self.with_deadline(step.id(), fut).await
            }
            StepKind::SubWorkflow { workflow, retry } => {
                self.execute_sub_workflow(step, workflow, *retry, ctx, previous, lineage)
                    .await
            }
        }
    }

    /// Bound a collaborator call by the configured step timeout, if any
    async fn with_deadline<F>(&self, step_id: &str, fut: F) -> Result<StepResult, WorkflowError>
    where
        F: Future<Output = Result<StepResult, WorkflowError>>,
    {
        match self.config.step_timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .map_err(|_| WorkflowError::timeout(step_id, timeout_ms))?,
            None => fut.await,
        }
    }

    async fn execute_agent_step(
        &self,
        step: &StepDefinition,
        agent_id: u32,
        inline_input: Option<&str>,
        ctx: &ExecutionContext,
        previous: Option<&StepResult>,
    ) -> Result<StepResult, WorkflowError> {
        let shared = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| WorkflowError::agent_not_found(agent_id))?;

        let label = step.agent_label().unwrap_or_default();
        debug!(step = %step.id(), agent = %label, "Invoking agent");

        // Prompt context is per-call state; never touch the shared agent
        let mut agent = shared.clone_agent();

        let prev = previous_content(previous);
        if let Some(content) = prev {
            agent.set_prompt_context(content);
        }

        let input = match inline_input {
            Some(message) => PromptInput::new(message),
            None => ctx.input().clone(),
        };

        let raw = agent
            .generate_with_tools(ctx.path(), &input)
            .await
            .map_err(|e| WorkflowError::step_execution(step.id(), e.to_string()))?;

        let content = if step.output_field().is_passthrough() {
            if let Some(reason) = invalid_reason(&raw) {
                return Err(WorkflowError::passthrough_rejected(step.id(), reason));
            }

            prev.map(str::to_string)
                .unwrap_or_else(|| ctx.input().message.clone())
        } else {
            process_output(&raw, step.output_field())
        };

        if agent.diff_settings().enabled {
            if let Err(e) = agent.apply_generated_patch(&raw).await {
                error!(
                    step = %step.id(),
                    agent = %label,
                    error = %e,
                    "Error applying generated patch for step"
                );
            }
        }

        Ok(StepResult::success(
            step.id(),
            StepSource::Agent(agent_id),
            content,
        ))
    }

    async fn execute_integration_step(
        &self,
        step: &StepDefinition,
        binding: &IntegrationBinding,
        ctx: &ExecutionContext,
        previous: Option<&StepResult>,
    ) -> Result<StepResult, WorkflowError> {
        let integration = self
            .integrations
            .get(&binding.integration)
            .ok_or_else(|| WorkflowError::integration_not_found(&binding.integration))?;

        let input = previous_content(previous).unwrap_or(&ctx.input().message);

        info!(
            step = %step.id(),
            integration = %binding.integration,
            event = %binding.event,
            "Calling integration"
        );

        let response = integration
            .call(&binding.event, Value::String(input.to_string()))
            .await
            .map_err(|e| {
                WorkflowError::step_execution(
                    step.id(),
                    format!("error calling integration: {}", e),
                )
            })?;

        match response {
            Value::String(content) => Ok(StepResult::success(
                step.id(),
                StepSource::Integration(binding.integration.clone()),
                content,
            )),
            _ => Err(WorkflowError::invalid_integration_response(
                &binding.integration,
            )),
        }
    }
}

/// The previous step's content, when there is any
pub(super) fn previous_content(previous: Option<&StepResult>) -> Option<&str> {
    previous
        .map(|p| p.content.as_str())
        .filter(|content| !content.is_empty())
}
