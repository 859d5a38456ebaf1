//! Sub-workflow steps: resolution, nesting guards and retry

use std::time::Duration;

use tracing::{error, info};

use super::step_executor::previous_content;
use super::runtime::{WorkflowKey, WorkflowRuntime};
use crate::domain::workflow::output::process_output;
use crate::domain::{
    ExecutionContext, PromptInput, RetryPolicy, StepDefinition, StepResult, StepSource,
    WorkflowError,
};

impl WorkflowRuntime {
    /// Run another workflow as a step, retrying it under `retry`
    ///
    /// `lineage` holds the workflows currently executing on this call chain, outermost
    /// first, including this one.
    pub(super) async fn execute_sub_workflow(
        &self,
        step: &StepDefinition,
        reference: &str,
        retry: RetryPolicy,
        ctx: &ExecutionContext,
        previous: Option<&StepResult>,
        lineage: &[WorkflowKey],
    ) -> Result<StepResult, WorkflowError> {
        let registry = self
            .registry()
            .await
            .ok_or_else(|| WorkflowError::sub_workflow_not_found(reference))?;
        let child = registry
            .resolve_runtime(reference)
            .ok_or_else(|| WorkflowError::sub_workflow_not_found(reference))?;

        let child_key = child.lineage_key();
        if lineage.contains(&child_key) {
            let chain: Vec<String> = lineage
                .iter()
                .chain(std::iter::once(&child_key))
                .map(ToString::to_string)
                .collect();
            return Err(WorkflowError::cyclic_reference(chain.join(" -> ")));
        }

        // The root workflow is not a nesting level
        if lineage.len() > self.config.max_nesting_depth {
            return Err(WorkflowError::max_nesting_depth(
                child_key.to_string(),
                self.config.max_nesting_depth,
            ));
        }

        let input = previous_content(previous).unwrap_or(&ctx.input().message);
        let max_attempts = retry.attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            info!(
                workflow = %reference,
                attempt,
                max_attempts,
                "Executing sub-workflow"
            );

            let outcome = child
                .run(PromptInput::new(input), ctx.path(), lineage)
                .await;

            let err = match outcome {
                Ok(results) => {
                    if let Some(final_result) = results.final_result() {
                        return Ok(sub_workflow_result(step, reference, &final_result.content));
                    }

                    let fallback = results
                        .last_step()
                        .map(|last| sub_workflow_result(step, reference, &last.content));
                    if let Some(result) = fallback.filter(|r| !r.content.is_empty()) {
                        return Ok(result);
                    }

                    format!("sub-workflow {} produced no output", reference)
                }
                Err(failure) => match failure.error {
                    // Retrying cannot change the call chain
                    e @ (WorkflowError::CyclicWorkflowReference(_)
                    | WorkflowError::MaxNestingDepth { .. }) => return Err(e),
                    e => e.to_string(),
                },
            };

            error!(
                workflow = %reference,
                attempt,
                error = %err,
                "Sub-workflow execution failed"
            );
            last_error = Some(err);

            if attempt < max_attempts && retry.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(retry.delay_ms)).await;
            }
        }

        Err(WorkflowError::sub_workflow_exhausted(
            reference,
            max_attempts,
            last_error.unwrap_or_default(),
        ))
    }
}

/// Step result carrying a sub-workflow's content, transformed by the step's output field
fn sub_workflow_result(step: &StepDefinition, reference: &str, content: &str) -> StepResult {
    StepResult::success(
        step.id(),
        StepSource::SubWorkflow(reference.to_string()),
        process_output(content, step.output_field()),
    )
}
