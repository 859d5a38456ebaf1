//! Validation-retry loop

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::runtime::{WorkflowKey, WorkflowRuntime};
use crate::domain::{
    ExecutionContext, PromptInput, ResolvedValidation, RunFailure, StepResult, StepResults,
    StepSource, WorkflowError, FINAL_STEP_ID,
};

/// Engine tuning shared by every workflow instance
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Full pipeline re-runs allowed before validation is declared failed
    pub max_validation_attempts: u32,

    /// Capacity of each workflow's inbound trigger channel
    pub trigger_channel_capacity: usize,

    /// How long an output send may wait on a full channel before the output is dropped
    pub output_send_timeout_ms: u64,

    /// Deepest allowed sub-workflow nesting
    pub max_nesting_depth: usize,

    /// Deadline for a single agent or integration call; none when unset
    pub step_timeout_ms: Option<u64>,

    /// Text delivered to outputs when a run fails or produces nothing
    pub fallback_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_validation_attempts: 20,
            trigger_channel_capacity: 100,
            output_send_timeout_ms: 5000,
            max_nesting_depth: 8,
            step_timeout_ms: None,
            fallback_message:
                "An error occurred while executing the workflow, please try again.".to_string(),
        }
    }
}

impl WorkflowRuntime {
    /// Run every step, re-running the whole pipeline until the validators accept
    /// the final result or the attempt budget runs out
    pub(super) fn run<'a>(
        &'a self,
        input: PromptInput,
        path: &'a str,
        lineage: &'a [WorkflowKey],
    ) -> BoxFuture<'a, Result<StepResults, RunFailure>> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "workflow_run",
            workflow = %self.definition.display_name(),
            run_id = %run_id,
            depth = lineage.len()
        );

        async move {
            if self.definition.is_empty() {
                return Err(RunFailure::from(WorkflowError::empty_workflow(
                    self.definition.display_name(),
                )));
            }

            let mut chain = lineage.to_vec();
            chain.push(self.lineage_key());

            let validations = self.resolve_validations();
            let mut ctx = ExecutionContext::new(input, validations).with_path(path);
            let max_attempts = self.config.max_validation_attempts.max(1);

            for attempt in 1..=max_attempts {
                ctx.reset_results();

                let last = match self.run_steps(&mut ctx, &chain).await {
                    Ok(last) => last,
                    Err(e) => return Err(RunFailure::new(e, ctx.into_results())),
                };

                match validate(ctx.validations(), last.content.clone()) {
                    Ok(content) => {
                        info!(attempt, "Validation succeeded");
                        ctx.record(StepResult {
                            step_id: FINAL_STEP_ID.to_string(),
                            content,
                            ..last
                        });
                        return Ok(ctx.into_results());
                    }
                    Err((validation, reason)) => {
                        warn!(
                            attempt,
                            max_attempts,
                            validation = %validation,
                            reason = %reason,
                            output = %last.content,
                            "Validation attempt failed, retrying"
                        );
                    }
                }
            }

            Err(RunFailure::new(
                WorkflowError::validation_exhausted(max_attempts),
                ctx.into_results(),
            ))
        }
        .instrument(span)
        .boxed()
    }

    /// One pass over the steps in declared order; returns the last step's result
    async fn run_steps(
        &self,
        ctx: &mut ExecutionContext,
        lineage: &[WorkflowKey],
    ) -> Result<StepResult, WorkflowError> {
        let mut previous: Option<StepResult> = None;

        for step in self.definition.steps() {
            match self.execute_step(step, ctx, previous.as_ref(), lineage).await {
                Ok(result) => {
                    ctx.record(result.clone());
                    previous = Some(result);
                }
                Err(e) => {
                    ctx.record(StepResult::failure(
                        step.id(),
                        StepSource::from(step.kind()),
                        e.to_string(),
                    ));
                    return Err(e);
                }
            }
        }

        previous.ok_or_else(|| WorkflowError::empty_workflow(self.definition.display_name()))
    }

    /// Look up this workflow's validation functions; unknown names are skipped
    fn resolve_validations(&self) -> Vec<ResolvedValidation> {
        self.definition
            .validation_functions()
            .iter()
            .filter_map(|name| {
                let resolved = self.validations.resolve(name);
                if resolved.is_none() {
                    warn!(validation = %name, "Validation function not found, skipping");
                }
                resolved
            })
            .collect()
    }
}

/// Run validators in order, each seeing the previous one's output
///
/// Stops at the first failure and returns the failing validator's name with its reason.
fn validate(
    validations: &[ResolvedValidation],
    content: String,
) -> Result<String, (String, String)> {
    validations.iter().try_fold(content, |content, validation| {
        validation
            .run(&content)
            .map_err(|failure| (validation.name().to_string(), failure.reason))
    })
}
