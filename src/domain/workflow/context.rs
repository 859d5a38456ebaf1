//! Per-run execution state and step results

use std::fmt;

use serde::Serialize;

use super::step_types::StepKind;
use crate::domain::agent::PromptInput;
use crate::domain::validation::ResolvedValidation;

/// Reserved result key for the validated final result
pub const FINAL_STEP_ID: &str = "final";

/// Which kind of target produced a step result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum StepSource {
    Agent(u32),
    Integration(String),
    SubWorkflow(String),
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent:{}", id),
            Self::Integration(name) => write!(f, "integration:{}", name),
            Self::SubWorkflow(name) => write!(f, "workflow:{}", name),
        }
    }
}

impl From<&StepKind> for StepSource {
    fn from(kind: &StepKind) -> Self {
        match kind {
            StepKind::Agent { agent_id, .. } => Self::Agent(*agent_id),
            StepKind::Integration(binding) => Self::Integration(binding.integration.clone()),
            StepKind::SubWorkflow { workflow, .. } => Self::SubWorkflow(workflow.clone()),
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub source: StepSource,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, source: StepSource, content: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            source,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(step_id: impl Into<String>, source: StepSource, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            source,
            content: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Step results keyed by step ID, in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StepResults {
    entries: Vec<StepResult>,
}

impl StepResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result; an existing entry with the same step ID is replaced in place
    pub fn insert(&mut self, result: StepResult) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.step_id == result.step_id)
        {
            Some(entry) => *entry = result,
            None => self.entries.push(result),
        }
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.entries.iter().find(|entry| entry.step_id == step_id)
    }

    /// The synthetic `final` result, present only after a fully successful run
    pub fn final_result(&self) -> Option<&StepResult> {
        self.get(FINAL_STEP_ID)
    }

    /// Last inserted result that is not the synthetic `final` entry
    pub fn last_step(&self) -> Option<&StepResult> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.step_id != FINAL_STEP_ID)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepResult> {
        self.entries.iter()
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step_id.as_str()).collect()
    }
}

impl IntoIterator for StepResults {
    type Item = StepResult;
    type IntoIter = std::vec::IntoIter<StepResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Mutable state owned by exactly one workflow invocation
pub struct ExecutionContext {
    results: StepResults,
    input: PromptInput,
    path: String,
    validations: Vec<ResolvedValidation>,
}

impl ExecutionContext {
    pub fn new(input: PromptInput, validations: Vec<ResolvedValidation>) -> Self {
        Self {
            results: StepResults::new(),
            input,
            path: String::new(),
            validations,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn input(&self) -> &PromptInput {
        &self.input
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn validations(&self) -> &[ResolvedValidation] {
        &self.validations
    }

    pub fn results(&self) -> &StepResults {
        &self.results
    }

    pub fn record(&mut self, result: StepResult) {
        self.results.insert(result);
    }

    /// Drop the results of a previous attempt
    pub fn reset_results(&mut self) {
        self.results.clear();
    }

    pub fn into_results(self) -> StepResults {
        self.results
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("results", &self.results)
            .field("input", &self.input)
            .field("path", &self.path)
            .field(
                "validations",
                &self.validations.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
