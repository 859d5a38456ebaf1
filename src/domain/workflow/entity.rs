//! Workflow definition entity

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::context::FINAL_STEP_ID;
use super::error::WorkflowError;
use super::step_types::{IntegrationBinding, StepDefinition};

/// An immutable workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier
    id: String,

    /// Human-readable name; the primary registry key
    name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,

    #[serde(default)]
    is_default: bool,

    /// Ordered list of steps
    #[serde(default)]
    steps: Vec<StepDefinition>,

    /// Destinations that receive the final result
    #[serde(default)]
    outputs: Vec<IntegrationBinding>,

    /// Event sources that start this workflow
    #[serde(default)]
    triggers: Vec<IntegrationBinding>,

    /// Validation functions run against the final result, in order
    #[serde(default)]
    validation_functions: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            is_default: false,
            steps: Vec::new(),
            outputs: Vec::new(),
            triggers: Vec::new(),
            validation_functions: Vec::new(),
        }
    }

    // Builder methods

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_output(mut self, output: IntegrationBinding) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_trigger(mut self, trigger: IntegrationBinding) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_validation_function(mut self, name: impl Into<String>) -> Self {
        self.validation_functions.push(name.into());
        self
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn outputs(&self) -> &[IntegrationBinding] {
        &self.outputs
    }

    pub fn triggers(&self) -> &[IntegrationBinding] {
        &self.triggers
    }

    pub fn validation_functions(&self) -> &[String] {
        &self.validation_functions
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Name if set, otherwise ID
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whether `reference` names this workflow by ID or name
    pub fn matches(&self, reference: &str) -> bool {
        (!self.id.is_empty() && self.id == reference)
            || (!self.name.is_empty() && self.name == reference)
    }

    /// Sub-workflow references made by this workflow's steps, in step order
    pub fn sub_workflow_refs(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| s.sub_workflow_ref())
    }

    /// Check structural invariants that step deserialization cannot
    ///
    /// Step IDs must be non-empty, unique, and must not collide with the reserved
    /// `final` result key. An empty step list is allowed here and rejected at execution.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();

        for step in &self.steps {
            if step.id().is_empty() {
                return Err(WorkflowError::invalid_step(
                    "",
                    format!("step in workflow '{}' has an empty ID", self.display_name()),
                ));
            }

            if step.id() == FINAL_STEP_ID {
                return Err(WorkflowError::invalid_step(
                    step.id(),
                    "step ID is reserved for the final result",
                ));
            }

            if !seen.insert(step.id()) {
                return Err(WorkflowError::duplicate_step(self.display_name(), step.id()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::output::OutputField;
    use crate::domain::workflow::step_types::RetryPolicy;
    use serde_json::json;

    #[test]
    fn test_definition_builder() {
        let definition = WorkflowDefinition::new("wf-1", "Planner")
            .with_description("Plans things")
            .with_default(true)
            .with_step(StepDefinition::agent("plan", 1))
            .with_step(StepDefinition::sub_workflow("review", "Reviewer"))
            .with_output(IntegrationBinding::new("discord", "send"))
            .with_trigger(IntegrationBinding::new("rss", "new_item"))
            .with_validation_function("planValidation");

        assert_eq!(definition.id(), "wf-1");
        assert_eq!(definition.name(), "Planner");
        assert!(definition.is_default());
        assert_eq!(definition.step_count(), 2);
        assert_eq!(definition.outputs().len(), 1);
        assert_eq!(definition.triggers().len(), 1);
        assert_eq!(definition.validation_functions(), ["planValidation"]);
        assert_eq!(definition.sub_workflow_refs().collect::<Vec<_>>(), ["Reviewer"]);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_matches_by_id_or_name() {
        let definition = WorkflowDefinition::new("prefix-id", "PrefixWorkflow");

        assert!(definition.matches("prefix-id"));
        assert!(definition.matches("PrefixWorkflow"));
        assert!(!definition.matches("Other"));
        assert!(!WorkflowDefinition::new("", "Named").matches(""));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let definition = WorkflowDefinition::new("wf", "Dup")
            .with_step(StepDefinition::agent("same", 1))
            .with_step(StepDefinition::agent("same", 2));

        let err = definition.validate().unwrap_err();
        assert_eq!(err, WorkflowError::duplicate_step("Dup", "same"));
    }

    #[test]
    fn test_reserved_final_step_id_rejected() {
        let definition =
            WorkflowDefinition::new("wf", "Final").with_step(StepDefinition::agent("final", 1));

        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_empty_steps_pass_structural_validation() {
        assert!(WorkflowDefinition::new("wf", "Empty").validate().is_ok());
    }

    #[test]
    fn test_deserialize_definition() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "research",
            "name": "Research",
            "steps": [
                {"id": "search", "integration": {"integration": "rss", "event": "search"}},
                {"id": "write", "agent_id": 2, "output_field": "generatedText"},
                {"id": "review", "workflow_id": "Review", "retry": {"max_attempts": 3, "delay_ms": 50}}
            ],
            "outputs": [{"integration": "matrix", "event": "message", "data": "room-1"}],
            "validation_functions": ["researchValidation"]
        }))
        .unwrap();

        assert_eq!(definition.step_count(), 3);
        assert_eq!(
            definition.steps()[1].output_field(),
            &OutputField::GeneratedText
        );
        assert_eq!(
            definition.steps()[2],
            StepDefinition::sub_workflow("review", "Review").with_retry(RetryPolicy::new(3, 50))
        );
        assert_eq!(
            definition.outputs()[0].data_text(),
            Some("room-1".to_string())
        );
    }

    #[test]
    fn test_deserialize_definition_with_invalid_step_fails() {
        let result: Result<WorkflowDefinition, _> = serde_json::from_value(json!({
            "id": "bad",
            "name": "Bad",
            "steps": [{"id": "nothing", "output_field": "generatedText"}]
        }));

        let err = result.unwrap_err();
        assert!(err
            .to_string()
            .contains("has no integration, agent, or workflow"));
    }
}
