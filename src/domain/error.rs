use thiserror::Error;

/// Errors returned by workflow collaborators
///
/// The step executor folds these into `WorkflowError::StepExecution`, keeping the text.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The model endpoint behind an agent failed or returned something unusable
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    #[error("Integration error: {integration} - {message}")]
    Integration { integration: String, message: String },

    /// A generated patch could not be applied to the agent's working tree
    #[error("Patch error: {message}")]
    Patch { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },
}

impl DomainError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn integration(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integration {
            integration: integration.into(),
            message: message.into(),
        }
    }

    pub fn patch(message: impl Into<String>) -> Self {
        Self::Patch {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}
