use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http_client::{HttpClient, HttpClientTrait};
use crate::config::AgentConfig;
use crate::domain::{AgentExecutor, DomainError, PromptInput};
use crate::infrastructure::workflow::AgentMap;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Agent backed by an OpenAI-compatible chat completions endpoint
///
/// Tools are not forwarded; the working path is only logged.
#[derive(Clone)]
pub struct ChatAgent {
    name: String,
    model: String,
    base_url: String,
    auth_header: Option<String>,
    system_prompt: Option<String>,
    prompt_context: Option<String>,
    client: Arc<dyn HttpClientTrait>,
}

impl ChatAgent {
    pub fn new(client: Arc<dyn HttpClientTrait>, model: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_header: None,
            system_prompt: None,
            prompt_context: None,
            client,
        }
    }

    /// Build from configuration, reading the API key from the configured environment variable
    pub fn from_config(config: &AgentConfig) -> Result<Self, DomainError> {
        let client = HttpClient::with_timeout(Duration::from_secs(config.timeout_secs))?;
        let mut agent = Self::new(Arc::new(client), &config.model)
            .with_name(&config.name)
            .with_base_url(&config.base_url);

        if let Some(ref var) = config.api_key_env {
            let api_key = std::env::var(var).map_err(|_| {
                DomainError::configuration(format!(
                    "Agent '{}' expects an API key in environment variable {}",
                    config.name, var
                ))
            })?;
            agent = agent.with_api_key(api_key);
        }

        if let Some(ref prompt) = config.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }

        Ok(agent)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.auth_header = Some(format!("Bearer {}", api_key.into()));
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers = vec![("Content-Type", "application/json")];
        if let Some(ref auth) = self.auth_header {
            headers.push(("Authorization", auth.as_str()));
        }
        headers
    }

    /// The user turn: prompt context, a blank line, then the message
    fn user_content(&self, input: &PromptInput) -> String {
        match self.prompt_context {
            Some(ref context) => format!("{}\n\n{}", context, input.message),
            None => input.message.clone(),
        }
    }

    fn build_request(&self, input: &PromptInput) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);

        if let Some(ref prompt) = self.system_prompt {
            messages.push(ChatMessage::new("system", prompt));
        }
        messages.push(ChatMessage::new("user", self.user_content(input)));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        })
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<String, DomainError> {
        let response: ChatResponse = serde_json::from_value(json).map_err(|e| {
            DomainError::provider(&self.model, format!("Failed to parse response: {}", e))
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::provider(&self.model, "No choices in response"))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

impl fmt::Debug for ChatAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatAgent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.auth_header.is_some())
            .field("prompt_context", &self.prompt_context.is_some())
            .finish()
    }
}

#[async_trait]
impl AgentExecutor for ChatAgent {
    fn clone_agent(&self) -> Box<dyn AgentExecutor> {
        Box::new(self.clone())
    }

    fn set_prompt_context(&mut self, context: &str) {
        self.prompt_context = Some(context.to_string());
    }

    async fn generate_with_tools(
        &self,
        path: &str,
        input: &PromptInput,
    ) -> Result<String, DomainError> {
        debug!(agent = %self.name, model = %self.model, path = %path, "Requesting chat completion");

        let url = self.chat_completions_url();
        let body = self.build_request(input);
        let response = self.client.post_json(&url, self.headers(), &body).await?;

        self.parse_response(response)
    }

    async fn apply_generated_patch(&self, _content: &str) -> Result<(), DomainError> {
        Err(DomainError::unsupported(format!(
            "Agent '{}' does not apply patches",
            self.name
        )))
    }
}

/// Build the agent map for a configuration, rejecting duplicate IDs
pub fn agents_from_config(configs: &[AgentConfig]) -> Result<AgentMap, DomainError> {
    let mut agents = AgentMap::with_capacity(configs.len());

    for config in configs {
        let agent: Arc<dyn AgentExecutor> = Arc::new(ChatAgent::from_config(config)?);
        if agents.insert(config.id, agent).is_some() {
            return Err(DomainError::configuration(format!(
                "Duplicate agent ID: {}",
                config.id
            )));
        }
    }

    Ok(agents)
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::agent::http_client::mock::MockHttpClient;

    const TEST_URL: &str = "https://api.openai.com/v1/chat/completions";

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-123",
            "model": "gpt-4o",
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_generate() {
        let client = MockHttpClient::new().with_response(TEST_URL, completion("Hello there"));
        let agent = ChatAgent::new(Arc::new(client.clone()), "gpt-4o")
            .with_name("planner")
            .with_api_key("test-key")
            .with_system_prompt("You plan things.");

        let output = agent
            .generate_with_tools("", &PromptInput::new("Plan a trip"))
            .await
            .unwrap();
        assert_eq!(output, "Hello there");

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].body;
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You plan things.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Plan a trip");
        assert!(requests[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer test-key".to_string())));
    }

    #[tokio::test]
    async fn test_prompt_context_is_prepended_to_copy_only() {
        let client = MockHttpClient::new().with_response(TEST_URL, completion("ok"));
        let agent = ChatAgent::new(Arc::new(client.clone()), "gpt-4o");

        let mut copy = agent.clone_agent();
        copy.set_prompt_context("previous output");
        copy.generate_with_tools("", &PromptInput::new("next"))
            .await
            .unwrap();
        agent
            .generate_with_tools("", &PromptInput::new("next"))
            .await
            .unwrap();

        let requests = client.requests();
        assert_eq!(
            requests[0].body["messages"][0]["content"],
            "previous output\n\nnext"
        );
        assert_eq!(requests[1].body["messages"][0]["content"], "next");
    }

    #[tokio::test]
    async fn test_custom_base_url() {
        let url = "http://localhost:8080/v1/chat/completions";
        let client = MockHttpClient::new().with_response(url, completion("local"));
        let agent = ChatAgent::new(Arc::new(client.clone()), "llama")
            .with_base_url("http://localhost:8080/");

        let output = agent
            .generate_with_tools("", &PromptInput::new("hi"))
            .await
            .unwrap();
        assert_eq!(output, "local");
        assert!(client.requests()[0]
            .headers
            .iter()
            .all(|(key, _)| key != "Authorization"));
    }

    #[tokio::test]
    async fn test_provider_error() {
        let client = MockHttpClient::new().with_error(TEST_URL, "API key invalid");
        let agent = ChatAgent::new(Arc::new(client), "gpt-4o");

        let err = agent
            .generate_with_tools("", &PromptInput::new("hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key invalid"));
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let client = MockHttpClient::new()
            .with_response(TEST_URL, serde_json::json!({ "choices": [] }));
        let agent = ChatAgent::new(Arc::new(client), "gpt-4o");

        let err = agent
            .generate_with_tools("", &PromptInput::new("hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No choices"));
    }

    #[tokio::test]
    async fn test_patches_unsupported() {
        let agent = ChatAgent::new(Arc::new(MockHttpClient::new()), "gpt-4o");

        assert!(!agent.diff_settings().enabled);
        let err = agent.apply_generated_patch("--- a\n+++ b").await.unwrap_err();
        assert!(matches!(err, DomainError::Unsupported { .. }));
    }

    #[test]
    fn test_agents_from_config_rejects_duplicates() {
        let config = AgentConfig {
            id: 1,
            name: "planner".to_string(),
            model: "gpt-4o".to_string(),
            ..AgentConfig::default()
        };

        let agents = agents_from_config(std::slice::from_ref(&config)).unwrap();
        assert!(agents.contains_key(&1));

        let err = agents_from_config(&[config.clone(), config]).unwrap_err();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = AgentConfig {
            id: 2,
            name: "keyed".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: Some("PMP_WORKFLOW_TEST_UNSET_KEY".to_string()),
            ..AgentConfig::default()
        };

        let err = ChatAgent::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("PMP_WORKFLOW_TEST_UNSET_KEY"));
    }
}
