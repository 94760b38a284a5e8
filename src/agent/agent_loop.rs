//! The resumable pipeline agent.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::actions::ActionExecutor;
use crate::conversation::{ConversationEngine, EngineParams, StepOutcome};
use crate::error::AgentError;
use crate::llm::{LlmClient, Message, Role, ToolDefinition};
use crate::pipeline::{Artifact, FunctionCatalog, PipelineCompiler, SchemaValidator};
use crate::tools::{ExchangeRecord, ToolDispatcher};
use crate::usage::{OpenGate, UsageGate};
use crate::workflow::{RetryUntilValid, WorkflowOutcome, WorkflowResult, DEFAULT_MAX_ATTEMPTS};

use super::callbacks::{ExchangeCallbacks, NoopCallbacks};
use super::prompt::{build_system_prompt, build_user_message};
use super::state::{
    AgentSnapshot, ControlRequest, ConversationHandle, Phase, Status, StatusKind,
};

const CONTINUE_MESSAGE: &str = "Continue working on the request.";

/// Tunables for every exchange run by a [`PipelineAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_attempts: usize,
    /// Rounds after which the tool set is dropped to force an answer.
    pub tool_round_limit: usize,
    /// Treat a plain terminal answer as pipeline JSON and validate it.
    pub expect_artifact: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tool_round_limit: 12,
            expect_artifact: true,
        }
    }
}

/// Runs exchanges and turns their results into snapshots.
pub struct PipelineAgent {
    client: Arc<dyn LlmClient>,
    executor: Arc<dyn ActionExecutor>,
    validator: Arc<dyn SchemaValidator>,
    compiler: Arc<dyn PipelineCompiler>,
    catalog: Option<Arc<dyn FunctionCatalog>>,
    gate: Arc<dyn UsageGate>,
    callbacks: Arc<dyn ExchangeCallbacks>,
    options: AgentOptions,
}

/// What the model side of an exchange produced.
struct ExchangeResult {
    history: Vec<Message>,
    record: ExchangeRecord,
    workflow: Option<WorkflowOutcome>,
    vetoed: bool,
}

impl PipelineAgent {
    /// Create an agent with the open gate and no-op callbacks.
    pub fn new(
        client: Arc<dyn LlmClient>,
        executor: Arc<dyn ActionExecutor>,
        validator: Arc<dyn SchemaValidator>,
        compiler: Arc<dyn PipelineCompiler>,
        options: AgentOptions,
    ) -> Self {
        Self {
            client,
            executor,
            validator,
            compiler,
            catalog: None,
            gate: Arc::new(OpenGate),
            callbacks: Arc::new(NoopCallbacks),
            options,
        }
    }

    /// Expose a function catalog through the node-schema tools.
    pub fn with_catalog(mut self, catalog: Arc<dyn FunctionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Consult `gate` around every model request.
    pub fn with_gate(mut self, gate: Arc<dyn UsageGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Send exchange results to `callbacks`.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn ExchangeCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Get the agent options.
    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Start a new conversation for `prompt`.
    pub async fn start_exchange(
        &self,
        prompt: &str,
        previous: Option<Value>,
        controls: &[ControlRequest],
        cancel: CancellationToken,
    ) -> Result<ConversationHandle, AgentError> {
        let handle = ConversationHandle::new(AgentSnapshot::new(prompt));
        tracing::info!(conversation = %handle.id, "Starting conversation");
        self.resume_exchange(handle, previous, controls, cancel).await
    }

    /// Apply `controls` to the handle's snapshot and, if the conversation is
    /// idle afterwards, run one exchange.
    ///
    /// On error the handle is consumed; a previously persisted copy of the
    /// snapshot is still valid.
    pub async fn resume_exchange(
        &self,
        mut handle: ConversationHandle,
        previous: Option<Value>,
        controls: &[ControlRequest],
        cancel: CancellationToken,
    ) -> Result<ConversationHandle, AgentError> {
        let now = Utc::now();
        for control in controls {
            handle.snapshot.apply_control(control, now);
        }

        if handle.snapshot.prompt.is_none() {
            return Err(AgentError::misuse("snapshot has no prompt to act on"));
        }

        if handle.snapshot.phase != Phase::Idle {
            tracing::debug!(
                conversation = %handle.id,
                phase = %handle.snapshot.phase,
                "Conversation is not idle, skipping exchange"
            );
            let status = standing_status(&handle.snapshot);
            self.callbacks.on_status(handle.id, &status).await;
            return Ok(handle);
        }

        handle.snapshot.phase = Phase::Acting;
        let result = self
            .run_exchange(handle.id, &handle.snapshot, previous.as_ref(), cancel)
            .await?;
        self.conclude(&mut handle, result, previous.as_ref()).await;
        Ok(handle)
    }

    async fn run_exchange(
        &self,
        id: Uuid,
        snapshot: &AgentSnapshot,
        previous: Option<&Value>,
        cancel: CancellationToken,
    ) -> Result<ExchangeResult, AgentError> {
        let mut dispatcher = ToolDispatcher::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.validator),
            Arc::clone(&self.compiler),
        )
        .with_previous(previous.cloned());
        if let Some(catalog) = &self.catalog {
            dispatcher = dispatcher.with_catalog(Arc::clone(catalog));
        }

        let tools = dispatcher.definitions();
        let history = self.starting_history(snapshot, previous, &tools);
        let params = EngineParams {
            temperature: self.options.temperature,
            source: "pipeline-agent".to_string(),
            ..EngineParams::new(&self.options.model)
        };

        let mut engine = ConversationEngine::new(&*self.client, &dispatcher, history, params)
            .with_tools(tools)
            .with_gate(&*self.gate)
            .with_cancellation(cancel)
            .with_tool_round_limit(self.options.tool_round_limit)
            .with_observer(move |message| {
                tracing::trace!(conversation = %id, ?message, "History append");
            });

        loop {
            match engine.step().await? {
                StepOutcome::Continue if dispatcher.has_outcome() => break,
                StepOutcome::Continue => continue,
                StepOutcome::Terminal | StepOutcome::Vetoed => break,
            }
        }

        let mut workflow = None;
        if self.options.expect_artifact
            && !engine.was_vetoed()
            && !dispatcher.has_outcome()
            && engine.terminal_output().is_some()
        {
            let outcome = RetryUntilValid::new(&*self.validator, &*self.compiler)
                .with_max_attempts(self.options.max_attempts)
                .run(&mut engine, || dispatcher.has_outcome())
                .await?;
            workflow = Some(outcome);
        }

        let vetoed = engine.was_vetoed();
        let history = engine.into_history();
        Ok(ExchangeResult {
            history,
            record: dispatcher.into_record(),
            workflow,
            vetoed,
        })
    }

    /// Fresh system prompt, then either the stored history or the user turn.
    fn starting_history(
        &self,
        snapshot: &AgentSnapshot,
        previous: Option<&Value>,
        tools: &[ToolDefinition],
    ) -> Vec<Message> {
        let mut history = vec![Message::system(build_system_prompt(
            tools,
            previous,
            self.options.expect_artifact,
        ))];

        match &snapshot.agent_state {
            Some(stored) if !stored.is_empty() => {
                history.extend(
                    stored
                        .iter()
                        .filter(|m| !matches!(m, Message::Text { role: Role::System, .. }))
                        .cloned(),
                );
                history.push(Message::user(CONTINUE_MESSAGE));
            }
            _ => {
                let prompt = snapshot.prompt.as_deref().unwrap_or_default();
                history.push(Message::user(build_user_message(
                    prompt,
                    &snapshot.instructions,
                )));
            }
        }
        history
    }

    /// Fold an exchange result into the snapshot and fire the callbacks.
    async fn conclude(
        &self,
        handle: &mut ConversationHandle,
        result: ExchangeResult,
        previous: Option<&Value>,
    ) {
        let ExchangeResult {
            history,
            record,
            workflow,
            vetoed,
        } = result;
        let id = handle.id;

        let attempts = workflow.as_ref().map_or(0, |w| w.attempts);
        let exhausted = match workflow.as_ref().map(|w| &w.result) {
            Some(WorkflowResult::Exhausted { last_error }) => Some(last_error.to_string()),
            _ => None,
        };
        let artifact: Option<Artifact> = record
            .artifact
            .or_else(|| workflow.and_then(|w| match w.result {
                WorkflowResult::Valid { artifact, .. } => Some(artifact),
                _ => None,
            }));
        let final_output = record.finished == Some(true) && record.output.is_some();

        let changed = artifact
            .as_ref()
            .map(|a| previous.map_or(true, |p| !a.same_pipeline(p)));

        let (phase, status) = if let Some(question) = &record.question {
            (
                Phase::AwaitingUser,
                Status::new(StatusKind::Question, question.question.clone()),
            )
        } else if let Some(changed) = changed {
            if changed {
                (Phase::Complete, Status::new(StatusKind::Updated, "Pipeline updated"))
            } else {
                (
                    Phase::Complete,
                    Status::new(StatusKind::Unchanged, "Pipeline unchanged"),
                )
            }
        } else if final_output {
            (Phase::Complete, Status::new(StatusKind::Output, "Output ready"))
        } else if record.finished == Some(false) {
            (
                Phase::Idle,
                Status::new(StatusKind::Pending, "The agent has more work to do"),
            )
        } else if vetoed {
            (
                Phase::Error,
                Status::new(StatusKind::Blocked, "Usage limit reached, request declined"),
            )
        } else if let Some(reason) = exhausted {
            (
                Phase::Error,
                Status::new(
                    StatusKind::Failed,
                    format!("No valid pipeline after {} attempts: {}", attempts, reason),
                ),
            )
        } else {
            (Phase::Complete, Status::new(StatusKind::Complete, "Done"))
        };

        tracing::info!(
            conversation = %id,
            phase = %phase,
            kind = ?status.kind,
            attempts,
            "Exchange concluded"
        );

        self.callbacks.on_raw_messages(id, &history).await;
        for note in &record.chat {
            self.callbacks.on_chat(id, note).await;
        }
        if let Some(output) = &record.output {
            self.callbacks.on_output(id, output).await;
        }
        if let (Some(artifact), Some(true)) = (&artifact, changed) {
            self.callbacks.on_artifact_update(id, artifact).await;
        }
        self.callbacks.on_status(id, &status).await;

        let snapshot = &mut handle.snapshot;
        snapshot.phase = phase;
        if phase == Phase::Error {
            snapshot.artifact = None;
        } else if artifact.is_some() {
            snapshot.artifact = artifact;
        }
        snapshot.pending_question = record.question;
        if record.output.is_some() {
            snapshot.output = record.output;
        }
        snapshot.status = Some(status);
        snapshot.attempts = attempts;
        snapshot.agent_state = Some(history);
    }
}

/// Status re-announced when a resume does not run the model.
fn standing_status(snapshot: &AgentSnapshot) -> Status {
    match snapshot.phase {
        Phase::Paused => Status::new(
            StatusKind::Paused,
            snapshot
                .pause_reason
                .clone()
                .unwrap_or_else(|| "Conversation is paused".to_string()),
        ),
        Phase::AwaitingUser => Status::new(
            StatusKind::Question,
            snapshot
                .pending_question
                .as_ref()
                .map(|q| q.question.clone())
                .unwrap_or_default(),
        ),
        _ => match &snapshot.status {
            Some(status) => Status::new(status.kind, status.message.clone()),
            None => Status::new(StatusKind::Complete, format!("Conversation is {}", snapshot.phase)),
        },
    }
}
