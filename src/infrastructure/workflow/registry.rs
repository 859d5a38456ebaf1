//! Registry of live workflows, used for sub-workflow resolution

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use super::instance::Workflow;
use super::runtime::{WorkflowDependencies, WorkflowRuntime};
use crate::domain::{WorkflowDefinition, WorkflowError};

/// Workflows keyed by name
///
/// Immutable once shared. Reconfiguration builds a new registry and drops the old one,
/// which stops every workflow it holds.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Workflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every definition, wire sub-workflow references, then register triggers and outputs
    ///
    /// Construction fails closed: any invalid definition or unknown integration aborts the
    /// whole build. A later definition with the same name replaces an earlier one.
    pub async fn build(
        definitions: Vec<WorkflowDefinition>,
        deps: WorkflowDependencies,
    ) -> Result<Arc<Self>, WorkflowError> {
        let mut registry = Self::new();

        for definition in definitions {
            registry.register(Workflow::new(definition, deps.clone())?);
        }

        // Triggers go live only once replaced duplicates are gone and references are wired
        let registry = registry.into_shared().await;
        for workflow in registry.workflows.values() {
            workflow.register_triggers().await?;
        }
        info!(workflows = registry.len(), "Workflow registry built");

        Ok(registry)
    }

    /// Add a workflow under its name (or ID when unnamed)
    pub fn register(&mut self, workflow: Workflow) {
        let key = workflow.name().to_string();
        self.insert(key, workflow);
    }

    /// Add a workflow under an explicit key, returning any workflow it replaces
    pub fn insert(&mut self, key: impl Into<String>, workflow: Workflow) -> Option<Workflow> {
        let key = key.into();
        let replaced = self.workflows.insert(key.clone(), workflow);
        if replaced.is_some() {
            warn!(workflow = %key, "Replacing previously registered workflow");
        }
        replaced
    }

    /// Share the registry and point every workflow's sub-workflow lookups at it
    pub async fn into_shared(self) -> Arc<Self> {
        let shared = Arc::new(self);
        for workflow in shared.workflows.values() {
            workflow.set_workflow_references(&shared).await;
        }
        shared
    }

    pub fn get(&self, key: &str) -> Option<&Workflow> {
        self.workflows.get(key)
    }

    /// Look up by key, then by declared ID or name
    pub fn resolve(&self, reference: &str) -> Option<&Workflow> {
        self.resolve_entry(reference).map(|(_, workflow)| workflow)
    }

    pub(super) fn resolve_runtime(&self, reference: &str) -> Option<Arc<WorkflowRuntime>> {
        self.resolve(reference)
            .map(|workflow| Arc::clone(workflow.runtime()))
    }

    fn resolve_entry(&self, reference: &str) -> Option<(&str, &Workflow)> {
        if let Some((key, workflow)) = self.workflows.get_key_value(reference) {
            return Some((key.as_str(), workflow));
        }

        self.workflows
            .iter()
            .find(|(_, workflow)| workflow.definition().matches(reference))
            .map(|(key, workflow)| (key.as_str(), workflow))
    }

    /// The first workflow flagged as default
    pub fn default_workflow(&self) -> Option<&Workflow> {
        self.workflows
            .values()
            .find(|workflow| workflow.definition().is_default())
    }

    /// Registered keys, sorted
    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Workflow)> {
        self.workflows
            .iter()
            .map(|(key, workflow)| (key.as_str(), workflow))
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Sub-workflow references that resolve to nothing, as `(workflow, reference)` pairs
    pub fn unresolved_references(&self) -> Vec<(String, String)> {
        self.workflows
            .iter()
            .flat_map(|(key, workflow)| {
                workflow
                    .definition()
                    .sub_workflow_refs()
                    .filter(move |reference| self.resolve_entry(reference).is_none())
                    .map(move |reference| (key.clone(), reference.to_string()))
            })
            .collect()
    }

    /// Report the first cycle in the static sub-workflow reference graph
    ///
    /// Unresolvable references are ignored here; see [`Self::unresolved_references`].
    pub fn detect_cycles(&self) -> Result<(), WorkflowError> {
        let mut done = HashSet::new();
        let mut stack = Vec::new();

        for key in self.workflows.keys() {
            self.visit(key, &mut stack, &mut done)?;
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        key: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), WorkflowError> {
        if done.contains(key) {
            return Ok(());
        }

        if let Some(start) = stack.iter().position(|k| *k == key) {
            let mut chain: Vec<&str> = stack[start..].to_vec();
            chain.push(key);
            return Err(WorkflowError::cyclic_reference(chain.join(" -> ")));
        }

        let Some(workflow) = self.workflows.get(key) else {
            return Ok(());
        };

        stack.push(key);
        for reference in workflow.definition().sub_workflow_refs() {
            if let Some((child, _)) = self.resolve_entry(reference) {
                self.visit(child, stack, done)?;
            }
        }
        stack.pop();
        done.insert(key);

        Ok(())
    }

    /// Stop every workflow's trigger router
    pub fn stop_all(&self) {
        for workflow in self.workflows.values() {
            workflow.stop();
        }
    }
}
