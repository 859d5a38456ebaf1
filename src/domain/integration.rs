//! Integration collaborator and the messages exchanged with it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

use crate::domain::workflow::IntegrationBinding;
use crate::domain::DomainError;

/// An event delivered to a workflow's trigger channel
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerMessage {
    Text(String),

    /// Integration event; its `data` becomes the workflow input
    Event(IntegrationBinding),

    Json(Value),
}

impl TriggerMessage {
    /// Normalise the event to the workflow's input text
    pub fn into_payload(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Event(binding) => value_text(binding.data),
            Self::Json(value) => value_text(value),
        }
    }
}

impl From<String> for TriggerMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for TriggerMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Body sent to an output binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputPayload {
    Text(String),
    Envelope { output: String, data: String },
}

impl OutputPayload {
    /// The workflow's final content
    pub fn output(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Envelope { output, .. } => output,
        }
    }
}

/// A final workflow result addressed to one output binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    pub integration: String,
    pub event: String,
    pub payload: OutputPayload,
}

impl OutputMessage {
    /// Build the message for `binding`; bindings with static data get an envelope
    pub fn for_binding(binding: &IntegrationBinding, output: impl Into<String>) -> Self {
        let output = output.into();
        let payload = match binding.data_text() {
            Some(data) => OutputPayload::Envelope { output, data },
            None => OutputPayload::Text(output),
        };

        Self {
            integration: binding.integration.clone(),
            event: binding.event.clone(),
            payload,
        }
    }
}

/// External system a workflow calls, is triggered by, or delivers results to
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Integration: Send + Sync {
    /// Invoke an integration event; workflow steps expect a string response
    async fn call(&self, event: &str, data: Value) -> Result<Value, DomainError>;

    /// Subscribe `channel` to an event source
    fn register_trigger(&self, event: &str, data: &Value, channel: mpsc::Sender<TriggerMessage>);

    /// Channel consumed by this integration for workflow outputs
    fn output_channel(&self) -> Option<mpsc::Sender<OutputMessage>>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Responder = dyn Fn(&str, &Value) -> Result<Value, DomainError> + Send + Sync;

    /// Integration double that records calls, trigger subscriptions and outputs
    pub struct RecordingIntegration {
        responder: Arc<Responder>,
        calls: Mutex<Vec<(String, Value)>>,
        triggers: Mutex<Vec<(String, mpsc::Sender<TriggerMessage>)>>,
        output_tx: Option<mpsc::Sender<OutputMessage>>,
        output_rx: Mutex<Option<mpsc::Receiver<OutputMessage>>>,
    }

    impl RecordingIntegration {
        pub fn from_fn(
            f: impl Fn(&str, &Value) -> Result<Value, DomainError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Arc::new(f),
                calls: Mutex::new(Vec::new()),
                triggers: Mutex::new(Vec::new()),
                output_tx: None,
                output_rx: Mutex::new(None),
            }
        }

        /// Echo the call data back as the response
        pub fn echo() -> Self {
            Self::from_fn(|_, data| Ok(data.clone()))
        }

        pub fn with_output_channel(mut self, capacity: usize) -> Self {
            let (tx, rx) = mpsc::channel(capacity);
            self.output_tx = Some(tx);
            self.output_rx = Mutex::new(Some(rx));
            self
        }

        pub fn take_output_receiver(&self) -> Option<mpsc::Receiver<OutputMessage>> {
            self.output_rx.lock().unwrap().take()
        }

        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn trigger_events(&self) -> Vec<String> {
            self.triggers
                .lock()
                .unwrap()
                .iter()
                .map(|(event, _)| event.clone())
                .collect()
        }

        /// Deliver `message` to every registered trigger channel
        pub async fn fire(&self, message: TriggerMessage) {
            let senders: Vec<_> = self
                .triggers
                .lock()
                .unwrap()
                .iter()
                .map(|(_, tx)| tx.clone())
                .collect();

            for tx in senders {
                tx.send(message.clone()).await.unwrap();
            }
        }
    }

    #[async_trait]
    impl Integration for RecordingIntegration {
        async fn call(&self, event: &str, data: Value) -> Result<Value, DomainError> {
            self.calls
                .lock()
                .unwrap()
                .push((event.to_string(), data.clone()));
            (self.responder)(event, &data)
        }

        fn register_trigger(
            &self,
            event: &str,
            _data: &Value,
            channel: mpsc::Sender<TriggerMessage>,
        ) {
            self.triggers
                .lock()
                .unwrap()
                .push((event.to_string(), channel));
        }

        fn output_channel(&self) -> Option<mpsc::Sender<OutputMessage>> {
            self.output_tx.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_payload_normalisation() {
        assert_eq!(TriggerMessage::from("hello").into_payload(), "hello");
        assert_eq!(
            TriggerMessage::Event(IntegrationBinding::new("rss", "item").with_data("new post"))
                .into_payload(),
            "new post"
        );
        assert_eq!(
            TriggerMessage::Event(IntegrationBinding::new("rss", "item")).into_payload(),
            ""
        );
        assert_eq!(
            TriggerMessage::Json(json!({"title": "x"})).into_payload(),
            "{\"title\":\"x\"}"
        );
    }

    #[test]
    fn test_output_message_envelope() {
        let plain = OutputMessage::for_binding(&IntegrationBinding::new("discord", "send"), "done");
        assert_eq!(plain.payload, OutputPayload::Text("done".to_string()));
        assert_eq!(plain.integration, "discord");

        let enveloped = OutputMessage::for_binding(
            &IntegrationBinding::new("matrix", "send").with_data("room-1"),
            "done",
        );
        assert_eq!(enveloped.payload.output(), "done");
        assert_eq!(
            serde_json::to_value(&enveloped.payload).unwrap(),
            json!({"output": "done", "data": "room-1"})
        );
    }
}
