//! Live workflow instance and its trigger/output router

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::WorkflowRegistry;
use super::runtime::{OutputRoute, WorkflowDependencies, WorkflowRuntime};
use crate::domain::{
    OutputMessage, PromptInput, RunFailure, StepResults, TriggerMessage, WorkflowDefinition,
    WorkflowError,
};

/// A workflow bound to its collaborators, with a background task draining its triggers
///
/// Trigger-driven runs of one instance are serialized by that task. Direct calls to
/// [`Workflow::execute`] and [`Workflow::execute_workflow`] may overlap with them; each
/// run owns its own execution context. Dropping the instance stops the task.
pub struct Workflow {
    runtime: Arc<WorkflowRuntime>,
    trigger_tx: mpsc::Sender<TriggerMessage>,
    cancel: CancellationToken,
    router: JoinHandle<()>,
}

impl Workflow {
    /// Build a workflow and start its trigger router
    ///
    /// Fails if the definition is structurally invalid. Must be called within a Tokio runtime.
    pub fn new(
        definition: WorkflowDefinition,
        deps: WorkflowDependencies,
    ) -> Result<Self, WorkflowError> {
        let runtime = Arc::new(WorkflowRuntime::new(definition, deps)?);
        let (trigger_tx, trigger_rx) =
            mpsc::channel(runtime.config().trigger_channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let router = tokio::spawn(route_triggers(
            Arc::clone(&runtime),
            trigger_rx,
            cancel.clone(),
        ));

        Ok(Self {
            runtime,
            trigger_tx,
            cancel,
            router,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        self.runtime.definition()
    }

    pub fn name(&self) -> &str {
        self.runtime.definition().display_name()
    }

    pub(super) fn runtime(&self) -> &Arc<WorkflowRuntime> {
        &self.runtime
    }

    /// Subscribe to trigger sources and collect output channels from the bound integrations
    pub async fn register_triggers(&self) -> Result<(), WorkflowError> {
        let definition = self.runtime.definition();
        let integrations = &self.runtime.integrations;

        info!(
            workflow = %self.name(),
            triggers = definition.triggers().len(),
            "Registering triggers for workflow"
        );

        for trigger in definition.triggers() {
            let integration = integrations.get(&trigger.integration).ok_or_else(|| {
                error!(
                    workflow = %self.name(),
                    integration = %trigger.integration,
                    "Integration not found during trigger registration"
                );
                WorkflowError::integration_not_found(&trigger.integration)
            })?;

            integration.register_trigger(&trigger.event, &trigger.data, self.trigger_tx.clone());
            debug!(
                workflow = %self.name(),
                integration = %trigger.integration,
                event = %trigger.event,
                "Registered trigger"
            );
        }

        let mut routes = Vec::with_capacity(definition.outputs().len());
        for output in definition.outputs() {
            let integration = integrations.get(&output.integration).ok_or_else(|| {
                error!(
                    workflow = %self.name(),
                    integration = %output.integration,
                    "Integration not found during output registration"
                );
                WorkflowError::integration_not_found(&output.integration)
            })?;

            routes.push(OutputRoute {
                binding: output.clone(),
                channel: integration.output_channel(),
            });
        }

        info!(
            workflow = %self.name(),
            outputs = routes.len(),
            "Finished registering triggers for workflow"
        );
        self.runtime.set_outputs(routes).await;

        Ok(())
    }

    /// Install the table used to resolve sub-workflow steps
    pub async fn set_workflow_references(&self, registry: &Arc<WorkflowRegistry>) {
        self.runtime.set_registry(registry).await;
    }

    /// Run the workflow and deliver the final result to every output binding
    ///
    /// Never fails: a failed or empty run delivers and returns the fallback message.
    pub async fn execute(&self, input: impl Into<TriggerMessage>) -> String {
        execute_and_dispatch(&self.runtime, input.into().into_payload()).await
    }

    /// Run the validation-retry loop directly, without output dispatch
    pub async fn execute_workflow(
        &self,
        input: PromptInput,
        path: &str,
    ) -> Result<StepResults, RunFailure> {
        self.runtime.run(input, path, &[]).await
    }

    /// Sender side of this workflow's trigger channel
    pub fn trigger_channel(&self) -> mpsc::Sender<TriggerMessage> {
        self.trigger_tx.clone()
    }

    /// One entry per output binding; `None` until registration finds a channel
    pub async fn output_channels(&self) -> Vec<Option<mpsc::Sender<OutputMessage>>> {
        self.runtime
            .outputs()
            .await
            .into_iter()
            .map(|route| route.channel)
            .collect()
    }

    /// Stop the trigger router; direct execution still works
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.router.is_finished()
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("runtime", &self.runtime)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Drain the trigger channel, one run at a time, until cancelled
async fn route_triggers(
    runtime: Arc<WorkflowRuntime>,
    mut trigger_rx: mpsc::Receiver<TriggerMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(workflow = %runtime.definition().display_name(), "Trigger router stopped");
                break;
            }
            message = trigger_rx.recv() => match message {
                Some(message) => {
                    execute_and_dispatch(&runtime, message.into_payload()).await;
                }
                None => break,
            },
        }
    }
}

async fn execute_and_dispatch(runtime: &WorkflowRuntime, payload: String) -> String {
    let workflow = runtime.definition().display_name();
    let fallback = &runtime.config().fallback_message;

    let output = match runtime.run(PromptInput::new(payload), "", &[]).await {
        Ok(results) => match results.final_result() {
            Some(result) if !result.content.is_empty() => result.content.clone(),
            _ => {
                error!(workflow = %workflow, "Final result not found");
                fallback.clone()
            }
        },
        Err(failure) => {
            error!(
                workflow = %workflow,
                error = %failure,
                completed_steps = failure.results.len(),
                "Error executing workflow"
            );
            fallback.clone()
        }
    };

    dispatch_outputs(runtime, &output).await;
    output
}

async fn dispatch_outputs(runtime: &WorkflowRuntime, output: &str) {
    let workflow = runtime.definition().display_name();
    let timeout = Duration::from_millis(runtime.config().output_send_timeout_ms);

    for (index, route) in runtime.outputs().await.into_iter().enumerate() {
        let Some(channel) = route.channel else {
            error!(workflow = %workflow, index, "Output channel is nil");
            continue;
        };

        let message = OutputMessage::for_binding(&route.binding, output);
        info!(
            workflow = %workflow,
            integration = %message.integration,
            event = %message.event,
            "Sending output to integration"
        );

        match channel.send_timeout(message, timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => warn!(
                workflow = %workflow,
                integration = %route.binding.integration,
                timeout_ms = timeout.as_millis() as u64,
                "Output channel full, dropping output"
            ),
            Err(SendTimeoutError::Closed(_)) => warn!(
                workflow = %workflow,
                integration = %route.binding.integration,
                "Output channel closed, dropping output"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use serde_json::{json, Value};
    use tokio::time::timeout;

    use super::*;
    use crate::domain::agent::mock::MockAgent;
    use crate::domain::integration::mock::RecordingIntegration;
    use crate::domain::integration::MockIntegration;
    use crate::domain::{
        AgentExecutor, DomainError, Integration, IntegrationBinding, OutputPayload,
        StepDefinition,
    };
    use crate::infrastructure::workflow::{EngineConfig, IntegrationMap};

    const WAIT: Duration = Duration::from_secs(2);

    fn deps(agent: &MockAgent, integrations: IntegrationMap) -> WorkflowDependencies {
        let mut agents = HashMap::new();
        agents.insert(1, Arc::new(agent.clone()) as Arc<dyn AgentExecutor>);
        WorkflowDependencies::new(agents, integrations)
    }

    fn single_step(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(name.to_lowercase(), name).with_step(StepDefinition::agent("answer", 1))
    }

    /// Agent that sleeps mid-generation and tracks how many generations overlap
    #[derive(Debug, Clone, Default)]
    struct SlowAgent {
        context: Option<String>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl SlowAgent {
        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentExecutor for SlowAgent {
        fn clone_agent(&self) -> Box<dyn AgentExecutor> {
            Box::new(self.clone())
        }

        fn set_prompt_context(&mut self, context: &str) {
            self.context = Some(context.to_string());
        }

        async fn generate_with_tools(
            &self,
            _path: &str,
            input: &PromptInput,
        ) -> Result<String, DomainError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(match &self.context {
                Some(context) => format!("{} then second {}", context, input.message),
                None => format!("first {}", input.message),
            })
        }

        async fn apply_generated_patch(&self, _content: &str) -> Result<(), DomainError> {
            Ok(())
        }
    }

    fn slow_deps(agent: &SlowAgent, integrations: IntegrationMap) -> WorkflowDependencies {
        let mut agents = HashMap::new();
        agents.insert(1, Arc::new(agent.clone()) as Arc<dyn AgentExecutor>);
        WorkflowDependencies::new(agents, integrations)
    }

    fn two_steps(name: &str) -> WorkflowDefinition {
        single_step(name).with_step(StepDefinition::agent("refine", 1))
    }

    #[tokio::test]
    async fn test_trigger_runs_workflow_and_delivers_output() {
        let agent = MockAgent::from_fn(|_, call| Ok(format!("echo: {}", call.message)));
        let source = Arc::new(RecordingIntegration::echo());
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();

        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("rss".to_string(), source.clone());
        integrations.insert("discord".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Echo")
                .with_trigger(IntegrationBinding::new("rss", "new_item"))
                .with_output(IntegrationBinding::new("discord", "send")),
            deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();
        assert_eq!(source.trigger_events(), ["new_item"]);

        source.fire(TriggerMessage::from("fresh post")).await;

        let message = timeout(WAIT, outputs.recv()).await.unwrap().unwrap();
        assert_eq!(message.integration, "discord");
        assert_eq!(message.event, "send");
        assert_eq!(message.payload, OutputPayload::Text("echo: fresh post".to_string()));
    }

    #[tokio::test]
    async fn test_structured_trigger_payloads_are_normalised() {
        let agent = MockAgent::from_fn(|_, call| Ok(call.message.clone()));
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("sink".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Normalise").with_output(IntegrationBinding::new("sink", "out")),
            deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        let trigger = workflow.trigger_channel();
        trigger
            .send(TriggerMessage::Event(
                IntegrationBinding::new("rss", "item").with_data("from event"),
            ))
            .await
            .unwrap();
        trigger
            .send(TriggerMessage::Json(json!({"id": 7})))
            .await
            .unwrap();

        let first = timeout(WAIT, outputs.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, outputs.recv()).await.unwrap().unwrap();
        assert_eq!(first.payload.output(), "from event");
        assert_eq!(second.payload.output(), "{\"id\":7}");
    }

    #[tokio::test]
    async fn test_output_envelope_for_bindings_with_data() {
        let agent = MockAgent::with_response("report");
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("matrix".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Report")
                .with_output(IntegrationBinding::new("matrix", "send").with_data("room-1"))
                .with_output(IntegrationBinding::new("matrix", "log")),
            deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        assert_eq!(workflow.execute("go").await, "report");

        let enveloped = outputs.recv().await.unwrap();
        assert_eq!(
            enveloped.payload,
            OutputPayload::Envelope {
                output: "report".to_string(),
                data: "room-1".to_string(),
            }
        );
        let plain = outputs.recv().await.unwrap();
        assert_eq!(plain.event, "log");
        assert_eq!(plain.payload, OutputPayload::Text("report".to_string()));
    }

    #[tokio::test]
    async fn test_failed_run_delivers_fallback() {
        let agent = MockAgent::with_error("model down");
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("sink".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Broken").with_output(IntegrationBinding::new("sink", "out")),
            deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        let fallback = EngineConfig::default().fallback_message;
        assert_eq!(workflow.execute("go").await, fallback);
        assert_eq!(outputs.recv().await.unwrap().payload.output(), fallback);
    }

    #[tokio::test]
    async fn test_nil_output_channel_is_skipped() {
        let agent = MockAgent::with_response("done");
        let silent: Arc<dyn Integration> = Arc::new(RecordingIntegration::echo());
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("silent".to_string(), silent);
        integrations.insert("sink".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Partial")
                .with_output(IntegrationBinding::new("silent", "out"))
                .with_output(IntegrationBinding::new("sink", "out")),
            deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        let channels = workflow.output_channels().await;
        assert_eq!(channels.len(), 2);
        assert!(channels[0].is_none());
        assert!(channels[1].is_some());

        assert_eq!(workflow.execute("go").await, "done");
        assert_eq!(outputs.recv().await.unwrap().integration, "sink");
    }

    #[tokio::test]
    async fn test_full_output_channel_drops_after_timeout() {
        let agent = MockAgent::with_response("late");
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(1));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("sink".to_string(), sink.clone());

        let config = EngineConfig {
            output_send_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let workflow = Workflow::new(
            single_step("Blocked").with_output(IntegrationBinding::new("sink", "out")),
            deps(&agent, integrations).with_config(config),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        let filler = OutputMessage::for_binding(&IntegrationBinding::new("sink", "out"), "filler");
        sink.output_channel().unwrap().send(filler).await.unwrap();

        let result = timeout(WAIT, workflow.execute("go")).await.unwrap();
        assert_eq!(result, "late");

        assert_eq!(outputs.recv().await.unwrap().payload.output(), "filler");
        assert!(outputs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_triggers_with_mock_integration() {
        let agent = MockAgent::with_response("x");
        let mut mock = MockIntegration::new();
        mock.expect_register_trigger()
            .withf(|event: &str, data: &Value, _channel| event == "cron" && data == &json!("*/5"))
            .times(1)
            .return_const(());
        mock.expect_output_channel().times(1).returning(|| None);

        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("scheduler".to_string(), Arc::new(mock));

        let workflow = Workflow::new(
            single_step("Scheduled")
                .with_trigger(IntegrationBinding::new("scheduler", "cron").with_data("*/5"))
                .with_output(IntegrationBinding::new("scheduler", "report")),
            deps(&agent, integrations),
        )
        .unwrap();

        workflow.register_triggers().await.unwrap();
        assert!(workflow.output_channels().await[0].is_none());
    }

    #[tokio::test]
    async fn test_register_triggers_unknown_integration() {
        let agent = MockAgent::with_response("x");
        let workflow = Workflow::new(
            single_step("Orphan").with_trigger(IntegrationBinding::new("missing", "event")),
            deps(&agent, HashMap::new()),
        )
        .unwrap();

        let err = workflow.register_triggers().await.unwrap_err();
        assert_eq!(err, WorkflowError::integration_not_found("missing"));

        let workflow = Workflow::new(
            single_step("Orphan").with_output(IntegrationBinding::new("gone", "event")),
            deps(&agent, HashMap::new()),
        )
        .unwrap();
        let err = workflow.register_triggers().await.unwrap_err();
        assert_eq!(err, WorkflowError::integration_not_found("gone"));
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_construction() {
        let agent = MockAgent::with_response("x");
        let result = Workflow::new(
            WorkflowDefinition::new("dup", "Dup")
                .with_step(StepDefinition::agent("same", 1))
                .with_step(StepDefinition::agent("same", 1)),
            deps(&agent, HashMap::new()),
        );

        assert!(result.unwrap_err().is_construction_error());
    }

    #[tokio::test]
    async fn test_stop_ends_router() {
        let agent = MockAgent::with_response("x");
        let workflow = Workflow::new(single_step("Stoppable"), deps(&agent, HashMap::new())).unwrap();
        assert!(workflow.is_running());

        workflow.stop();
        timeout(WAIT, async {
            while workflow.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Direct execution keeps working without the router
        assert_eq!(workflow.execute("still here").await, "x");
    }

    #[tokio::test]
    async fn test_overlapping_direct_runs_keep_separate_contexts() {
        let agent = SlowAgent::default();
        let workflow = Workflow::new(two_steps("Overlap"), slow_deps(&agent, HashMap::new())).unwrap();

        let (left, right) = tokio::join!(
            workflow.execute_workflow(PromptInput::new("left"), ""),
            workflow.execute_workflow(PromptInput::new("right"), ""),
        );
        let left = left.unwrap();
        let right = right.unwrap();

        assert_eq!(agent.peak(), 2);
        assert_eq!(left.get("answer").unwrap().content, "first left");
        assert_eq!(
            left.final_result().unwrap().content,
            "first left then second left"
        );
        assert_eq!(right.get("answer").unwrap().content, "first right");
        assert_eq!(
            right.final_result().unwrap().content,
            "first right then second right"
        );
    }

    #[tokio::test]
    async fn test_trigger_runs_never_overlap() {
        let agent = SlowAgent::default();
        let sink = Arc::new(RecordingIntegration::echo().with_output_channel(8));
        let mut outputs = sink.take_output_receiver().unwrap();
        let mut integrations: IntegrationMap = HashMap::new();
        integrations.insert("sink".to_string(), sink.clone());

        let workflow = Workflow::new(
            single_step("Serial").with_output(IntegrationBinding::new("sink", "out")),
            slow_deps(&agent, integrations),
        )
        .unwrap();
        workflow.register_triggers().await.unwrap();

        let trigger = workflow.trigger_channel();
        for message in ["a", "b", "c", "d"] {
            trigger.send(TriggerMessage::from(message)).await.unwrap();
        }

        let mut delivered = Vec::new();
        for _ in 0..4 {
            let message = timeout(WAIT, outputs.recv()).await.unwrap().unwrap();
            delivered.push(message.payload.output().to_string());
        }

        assert_eq!(delivered, ["first a", "first b", "first c", "first d"]);
        assert_eq!(agent.peak(), 1);
    }
}
