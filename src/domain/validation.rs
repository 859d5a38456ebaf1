//! Named validation functions run against a workflow's final result

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::workflow::output::{invalid_reason, INVALID_MARKER};

const VALID_MARKER: &str = "VALID:";

/// A validator rejected the content
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationFailure {
    pub reason: String,
}

impl ValidationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Inspect content and return it, possibly rewritten, or reject it
pub type ValidationFn = Arc<dyn Fn(&str) -> Result<String, ValidationFailure> + Send + Sync>;

/// A validation function looked up by name for one run
#[derive(Clone)]
pub struct ResolvedValidation {
    name: String,
    func: ValidationFn,
}

impl ResolvedValidation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, content: &str) -> Result<String, ValidationFailure> {
        (self.func)(content)
    }
}

impl fmt::Debug for ResolvedValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedValidation")
            .field("name", &self.name)
            .finish()
    }
}

/// Validation functions available to workflows, built once and shared
#[derive(Clone, Default)]
pub struct ValidationRegistry {
    functions: HashMap<String, ValidationFn>,
}

impl ValidationRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `planValidation` and `researchValidation`
    pub fn with_builtins() -> Self {
        Self::new()
            .with_function("planValidation", |content| verdict_validation("plan", content))
            .with_function("researchValidation", |content| {
                verdict_validation("research", content)
            })
    }

    pub fn with_function(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&str) -> Result<String, ValidationFailure> + Send + Sync + 'static,
    ) -> Self {
        self.register(name, func);
        self
    }

    /// Add or replace a named function
    pub fn register(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&str) -> Result<String, ValidationFailure> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(func));
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedValidation> {
        self.functions.get(name).map(|func| ResolvedValidation {
            name: name.to_string(),
            func: Arc::clone(func),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ValidationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Accept `VALID:` verdicts and reject `INVALID:` ones, from a validator agent's output
fn verdict_validation(kind: &str, content: &str) -> Result<String, ValidationFailure> {
    if content.contains(INVALID_MARKER) {
        return Err(match invalid_reason(content) {
            Some(reason) if !reason.is_empty() => {
                ValidationFailure::new(format!("{} validation failed: {}", kind, reason))
            }
            _ => ValidationFailure::new(format!("{} validation failed", kind)),
        });
    }

    if content.contains(VALID_MARKER) {
        return Ok(content.to_string());
    }

    Err(ValidationFailure::new(format!(
        "{} validation did not produce a clear result",
        kind
    )))
}
