//! Workflow step type definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WorkflowError;
use super::output::OutputField;

/// Binding to an integration: used by trigger bindings, output bindings and integration steps
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntegrationBinding {
    /// Integration name, as registered in the integration map
    #[serde(default)]
    pub integration: String,

    /// Integration-specific event name
    #[serde(default)]
    pub event: String,

    /// Opaque static data attached to the binding
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl IntegrationBinding {
    pub fn new(integration: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            integration: integration.into(),
            event: event.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Binding data as text, `None` when absent or an empty string
    pub fn data_text(&self) -> Option<String> {
        match &self.data {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Retry behavior for sub-workflow steps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    /// Number of attempts to make; never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// What a step invokes
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Call an agent; `inline_input` replaces the input message when set
    Agent {
        agent_id: u32,
        agent_name: Option<String>,
        inline_input: Option<String>,
    },

    /// Call an integration event with the previous step's content
    Integration(IntegrationBinding),

    /// Run another workflow, retrying it under `retry`
    SubWorkflow { workflow: String, retry: RetryPolicy },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Agent { .. } => "agent",
            Self::Integration(_) => "integration",
            Self::SubWorkflow { .. } => "sub_workflow",
        }
    }
}

/// Serialized shape of a step, as it appears in configuration files
///
/// Exactly one of `agent_id`, `integration.integration` or `workflow_id` must be set.
/// An `integration` block with data but no integration name on an agent step supplies
/// the agent's input message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepSettings {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    #[serde(default)]
    pub output_field: OutputField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationBinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// A validated workflow step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "StepSettings", into = "StepSettings")]
pub struct StepDefinition {
    id: String,
    output_field: OutputField,
    kind: StepKind,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            output_field: OutputField::default(),
            kind,
        }
    }

    pub fn agent(id: impl Into<String>, agent_id: u32) -> Self {
        Self::new(
            id,
            StepKind::Agent {
                agent_id,
                agent_name: None,
                inline_input: None,
            },
        )
    }

    pub fn integration(id: impl Into<String>, binding: IntegrationBinding) -> Self {
        Self::new(id, StepKind::Integration(binding))
    }

    pub fn sub_workflow(id: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::SubWorkflow {
                workflow: workflow.into(),
                retry: RetryPolicy::default(),
            },
        )
    }

    pub fn with_output_field(mut self, output_field: OutputField) -> Self {
        self.output_field = output_field;
        self
    }

    /// Set the retry policy; only sub-workflow steps retry
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        if let StepKind::SubWorkflow { retry, .. } = &mut self.kind {
            *retry = policy;
        }
        self
    }

    /// Set the inline input message; only agent steps use it
    pub fn with_inline_input(mut self, input: impl Into<String>) -> Self {
        if let StepKind::Agent { inline_input, .. } = &mut self.kind {
            *inline_input = Some(input.into());
        }
        self
    }

    /// Set the agent's display name; only agent steps carry one
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        if let StepKind::Agent { agent_name, .. } = &mut self.kind {
            *agent_name = Some(name.into());
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// How logs refer to an agent step's agent: `name (#id)`, or `#id` when unnamed
    pub fn agent_label(&self) -> Option<String> {
        match &self.kind {
            StepKind::Agent {
                agent_id,
                agent_name: Some(name),
                ..
            } if !name.is_empty() => Some(format!("{} (#{})", name, agent_id)),
            StepKind::Agent { agent_id, .. } => Some(format!("#{}", agent_id)),
            _ => None,
        }
    }

    pub fn output_field(&self) -> &OutputField {
        &self.output_field
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// The referenced sub-workflow, if this is a sub-workflow step
    pub fn sub_workflow_ref(&self) -> Option<&str> {
        match &self.kind {
            StepKind::SubWorkflow { workflow, .. } => Some(workflow),
            _ => None,
        }
    }
}

impl TryFrom<StepSettings> for StepDefinition {
    type Error = WorkflowError;

    fn try_from(settings: StepSettings) -> Result<Self, Self::Error> {
        let has_agent = settings.agent_id.is_some_and(|id| id != 0);
        let has_integration = settings
            .integration
            .as_ref()
            .is_some_and(|b| !b.integration.is_empty());
        let has_workflow = settings
            .workflow_id
            .as_ref()
            .is_some_and(|w| !w.is_empty());

        let targets = [has_agent, has_integration, has_workflow]
            .iter()
            .filter(|set| **set)
            .count();

        if targets == 0 {
            return Err(WorkflowError::invalid_step(
                &settings.id,
                "step has no integration, agent, or workflow",
            ));
        }

        if targets > 1 {
            return Err(WorkflowError::invalid_step(
                &settings.id,
                "step sets more than one of integration, agent, or workflow",
            ));
        }

        let kind = if let Some(workflow) = settings.workflow_id.filter(|w| !w.is_empty()) {
            StepKind::SubWorkflow {
                workflow,
                retry: settings.retry.unwrap_or_default(),
            }
        } else if has_integration {
            StepKind::Integration(settings.integration.unwrap_or_default())
        } else {
            StepKind::Agent {
                agent_id: settings.agent_id.unwrap_or_default(),
                agent_name: settings.agent_name,
                inline_input: settings.integration.and_then(|b| match b.data {
                    Value::String(s) if !s.is_empty() => Some(s),
                    _ => None,
                }),
            }
        };

        Ok(Self {
            id: settings.id,
            output_field: settings.output_field,
            kind,
        })
    }
}

impl From<StepDefinition> for StepSettings {
    fn from(step: StepDefinition) -> Self {
        let mut settings = StepSettings {
            id: step.id,
            output_field: step.output_field,
            ..Default::default()
        };

        match step.kind {
            StepKind::Agent {
                agent_id,
                agent_name,
                inline_input,
            } => {
                settings.agent_id = Some(agent_id);
                settings.agent_name = agent_name;
                settings.integration = inline_input.map(|input| IntegrationBinding {
                    data: Value::String(input),
                    ..Default::default()
                });
            }
            StepKind::Integration(binding) => settings.integration = Some(binding),
            StepKind::SubWorkflow { workflow, retry } => {
                settings.workflow_id = Some(workflow);
                settings.retry = Some(retry);
            }
        }

        settings
    }
}
