//! Conversation engine: one bounded, cancellable exchange with the model.
//!
//! The engine follows the "tools in a loop" pattern, one round per
//! [`ConversationEngine::step`] call:
//! 1. Send the full history plus the active tools to the model
//! 2. Append every response item to history
//! 3. Run each requested tool call and append its result
//! 4. Stop once the model answers with a plain message
//!
//! Callers own the loop, so they can check cancellation or inspect history
//! between rounds. Tool failures are written into history as text and never
//! escape; transport failures and cancellation do.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, ToolError};
use crate::llm::{
    LlmClient, LlmError, Message, ModelRequest, ModelResponse, ResponseFormat, ToolCall,
    ToolDefinition,
};
use crate::usage::{OpenGate, UsageEvent, UsageGate};

static OPEN_GATE: OpenGate = OpenGate;

/// Services tool calls issued during an exchange.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        call: &ToolCall,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError>;
}

/// Model parameters for an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    /// Tag reported to the usage gate.
    pub source: String,
}

impl EngineParams {
    /// Create parameters for `model`; sampling is left to the provider.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            response_format: None,
            source: "agent".to_string(),
        }
    }
}

/// What a single round produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Only tool calls; another round is needed.
    Continue,
    /// The model answered with a plain message.
    Terminal,
    /// The usage gate declined the request; the exchange is over.
    Vetoed,
}

type Observer<'a> = Box<dyn Fn(&Message) + Send + Sync + 'a>;

/// Drives one exchange. See the module docs.
pub struct ConversationEngine<'a> {
    client: &'a dyn LlmClient,
    handler: &'a dyn ToolHandler,
    gate: &'a dyn UsageGate,
    params: EngineParams,
    tools: Vec<ToolDefinition>,
    history: Vec<Message>,
    cancel: CancellationToken,
    observer: Option<Observer<'a>>,
    tool_round_limit: Option<usize>,
    terminal: Option<String>,
    vetoed: bool,
    rounds: usize,
}

impl<'a> ConversationEngine<'a> {
    /// Create an engine over `history` with no tools and the open gate.
    pub fn new(
        client: &'a dyn LlmClient,
        handler: &'a dyn ToolHandler,
        history: Vec<Message>,
        params: EngineParams,
    ) -> Self {
        Self {
            client,
            handler,
            gate: &OPEN_GATE,
            params,
            tools: Vec::new(),
            history,
            cancel: CancellationToken::new(),
            observer: None,
            tool_round_limit: None,
            terminal: None,
            vetoed: false,
            rounds: 0,
        }
    }

    /// Declare `tools` to the model on every request.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Consult `gate` around every model request.
    pub fn with_gate(mut self, gate: &'a dyn UsageGate) -> Self {
        self.gate = gate;
        self
    }

    /// Abort in-flight work when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called synchronously after every history append.
    pub fn with_observer(mut self, observer: impl Fn(&Message) + Send + Sync + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// After this many rounds the tool set is dropped, forcing an answer.
    pub fn with_tool_round_limit(mut self, limit: usize) -> Self {
        self.tool_round_limit = Some(limit);
        self
    }

    /// Get the conversation so far.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Consume the engine, returning its history.
    pub fn into_history(self) -> Vec<Message> {
        self.history
    }

    /// Get the tools currently declared to the model.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Get the request parameters.
    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Number of tool rounds serviced so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Get the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Text of the plain answer that ended the conversation, if any.
    pub fn terminal_output(&self) -> Option<&str> {
        self.terminal.as_deref()
    }

    /// Whether the conversation has ended, by answer or veto.
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some() || self.vetoed
    }

    /// Whether the usage gate refused a request.
    pub fn was_vetoed(&self) -> bool {
        self.vetoed
    }

    /// Remove all tools so the next round must produce an answer.
    pub fn clear_tools(&mut self) {
        self.tools.clear();
    }

    /// Forget the terminal answer so the exchange can run another round.
    pub fn clear_terminal_output(&mut self) {
        self.terminal = None;
    }

    /// Append a caller-authored item (e.g. a diagnostic) to history.
    pub fn push_message(&mut self, message: Message) {
        self.append(message);
    }

    /// Run rounds until the model answers or the gate vetoes.
    pub async fn run_to_terminal(&mut self) -> Result<StepOutcome, AgentError> {
        loop {
            match self.step().await? {
                StepOutcome::Continue => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Run one round.
    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        if self.is_terminal() {
            return Err(AgentError::misuse(
                "conversation already reached a terminal output",
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        if let Some(limit) = self.tool_round_limit {
            if self.rounds >= limit && !self.tools.is_empty() {
                info!(rounds = self.rounds, "Tool round limit reached, requesting a final answer");
                self.clear_tools();
            }
        }

        self.rounds += 1;
        debug!(
            round = self.rounds,
            messages = self.history.len(),
            tools = self.tools.len(),
            "Conversation round"
        );

        let mut event = UsageEvent::start(&self.params.source, &self.params.model)
            .with_metadata("round", json!(self.rounds));
        if !self.gate.request_started(&event).await {
            warn!(round = self.rounds, "Usage gate declined the model request");
            self.vetoed = true;
            return Ok(StepOutcome::Vetoed);
        }

        let request = self.build_request();
        let result = self.send_with_degrade(request).await;
        event.finish(result.as_ref().ok().and_then(|r| r.usage));
        self.gate.request_finished(&event).await;
        let response = result?;

        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let mut answer: Option<String> = None;
        let mut calls = Vec::new();
        for item in response.items {
            if let Some(text) = item.assistant_text() {
                answer = Some(match answer.take() {
                    Some(prev) => format!("{}\n{}", prev, text),
                    None => text.to_string(),
                });
            }
            if let Some(call) = item.as_tool_call() {
                calls.push(call.clone());
            }
            self.append(item);
        }

        for call in &calls {
            let result = self.run_tool(call).await?;
            self.append(result);
        }

        match answer {
            Some(text) => {
                info!(round = self.rounds, "Conversation reached a terminal answer");
                self.terminal = Some(text);
                Ok(StepOutcome::Terminal)
            }
            None => Ok(StepOutcome::Continue),
        }
    }

    fn append(&mut self, message: Message) {
        self.history.push(message);
        if let (Some(observer), Some(last)) = (&self.observer, self.history.last()) {
            observer(last);
        }
    }

    fn build_request(&self) -> ModelRequest {
        ModelRequest {
            model: self.params.model.clone(),
            messages: self.history.clone(),
            tools: self.tools.clone(),
            response_format: self.params.response_format,
            temperature: self.params.temperature,
        }
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.client.complete(request) => result.map_err(AgentError::from),
        }
    }

    /// Send, retrying once without a parameter the model rejected.
    async fn send_with_degrade(
        &mut self,
        request: ModelRequest,
    ) -> Result<ModelResponse, AgentError> {
        match self.send(&request).await {
            Err(AgentError::Transport(LlmError::UnsupportedParameter { param, message })) => {
                let Some(stripped) = request.without_parameter(&param) else {
                    return Err(AgentError::Transport(LlmError::UnsupportedParameter {
                        param,
                        message,
                    }));
                };
                warn!(
                    param = %param,
                    model = %self.params.model,
                    "Model rejected parameter, retrying without it"
                );
                self.strip_parameter(&param);
                self.send(&stripped).await
            }
            other => other,
        }
    }

    /// Keep a rejected parameter out of later rounds too.
    fn strip_parameter(&mut self, param: &str) {
        match param {
            "temperature" => self.params.temperature = None,
            "response_format" => self.params.response_format = None,
            "tools" | "tool_choice" => self.tools.clear(),
            _ => {}
        }
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<Message, AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        debug!(tool = %call.name, call_id = %call.id, "Running tool call");

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = self.handler.handle(call, &self.history, &self.cancel) => outcome,
        };
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let (output, is_error) = match outcome {
            Ok(value) => (value.to_string(), false),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {}", e), true)
            }
        };
        Ok(Message::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{text, tool_calls, FnHandler, ScriptedClient};
    use crate::usage::TokenBudgetGate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn params() -> EngineParams {
        EngineParams {
            temperature: Some(0.3),
            ..EngineParams::new("test-model")
        }
    }

    fn echo_handler() -> FnHandler {
        FnHandler::new(|call| Ok(json!({ "ok": true, "tool": call.name })))
    }

    #[tokio::test]
    async fn runs_tools_until_terminal_answer() {
        let client = ScriptedClient::new(vec![
            Ok(tool_calls(&[("c1", "goto", json!({"url": "https://example.com"}))])),
            Ok(text("done")),
        ]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![Message::user("go")], params());

        assert_eq!(engine.step().await.unwrap(), StepOutcome::Continue);
        assert!(!engine.is_terminal());
        assert_eq!(engine.step().await.unwrap(), StepOutcome::Terminal);
        assert_eq!(engine.terminal_output(), Some("done"));

        let history = engine.history();
        assert_eq!(history.len(), 4);
        assert!(matches!(&history[2], Message::ToolResult { call_id, output, is_error: false, .. }
            if call_id == "c1" && output.contains("\"ok\":true")));

        // Every request carries the full history so far.
        let requests = client.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn driving_a_terminal_exchange_is_misuse() {
        let client = ScriptedClient::new(vec![Ok(text("hi"))]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![], params());
        engine.run_to_terminal().await.unwrap();
        assert!(matches!(engine.step().await, Err(AgentError::Misuse(_))));
    }

    #[tokio::test]
    async fn tool_failures_are_absorbed_into_history() {
        let client = ScriptedClient::new(vec![
            Ok(tool_calls(&[("c1", "click", json!({})), ("c2", "goto", json!({}))])),
            Ok(text("recovered")),
        ]);
        let handler = FnHandler::new(|call| {
            if call.name == "click" {
                Err(ToolError::InvalidInput("no element matched".into()))
            } else {
                Ok(json!(null))
            }
        });
        let mut engine = ConversationEngine::new(&client, &handler, vec![Message::user("x")], params());
        engine.run_to_terminal().await.unwrap();

        let results: Vec<_> = engine
            .history()
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { call_id, output, is_error, .. } => {
                    Some((call_id.as_str(), output.as_str(), *is_error))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            results,
            vec![
                ("c1", "Error: invalid input: no element matched", true),
                ("c2", "null", false),
            ]
        );
    }

    #[tokio::test]
    async fn degrades_once_on_unsupported_parameter() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::UnsupportedParameter {
                param: "temperature".into(),
                message: "nope".into(),
            }),
            Ok(text("fine")),
            Ok(text("second exchange")),
        ]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![Message::user("x")], params());
        assert_eq!(engine.step().await.unwrap(), StepOutcome::Terminal);

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].temperature, Some(0.3));
        assert_eq!(requests[1].temperature, None);
        assert_eq!(engine.params().temperature, None);
    }

    #[tokio::test]
    async fn second_rejection_propagates() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::UnsupportedParameter {
                param: "temperature".into(),
                message: "nope".into(),
            }),
            Err(LlmError::Http {
                status: 500,
                body: "boom".into(),
            }),
        ]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![], params());
        let err = engine.step().await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(LlmError::Http { status: 500, .. })));
    }

    #[tokio::test]
    async fn rejection_of_absent_parameter_propagates() {
        let client = ScriptedClient::new(vec![Err(LlmError::UnsupportedParameter {
            param: "top_p".into(),
            message: "nope".into(),
        })]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![], params());
        assert!(matches!(
            engine.step().await,
            Err(AgentError::Transport(LlmError::UnsupportedParameter { .. }))
        ));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_first_round_leaves_history_untouched() {
        let client = ScriptedClient::new(vec![Ok(text("never"))]);
        let handler = echo_handler();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let history = vec![Message::system("s"), Message::user("u")];
        let mut engine = ConversationEngine::new(&client, &handler, history.clone(), params())
            .with_cancellation(cancel);

        let err = engine.run_to_terminal().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(engine.history(), history.as_slice());
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_tool_call_raises() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let client = ScriptedClient::new(vec![
            Ok(tool_calls(&[("c1", "goto", json!({}))])),
            Ok(text("unreachable")),
        ]);
        let handler = FnHandler::new(move |_| {
            trigger.cancel();
            Ok(json!({}))
        });
        let mut engine = ConversationEngine::new(&client, &handler, vec![], params())
            .with_cancellation(cancel);
        assert!(engine.run_to_terminal().await.unwrap_err().is_cancelled());
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn gate_veto_ends_exchange_without_error() {
        let gate = TokenBudgetGate::new(0);
        let client = ScriptedClient::new(vec![Ok(text("never"))]);
        let handler = echo_handler();
        let mut engine =
            ConversationEngine::new(&client, &handler, vec![], params()).with_gate(&gate);
        assert_eq!(engine.run_to_terminal().await.unwrap(), StepOutcome::Vetoed);
        assert!(engine.is_terminal());
        assert!(engine.was_vetoed());
        assert_eq!(engine.terminal_output(), None);
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn observer_sees_every_append() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let client = ScriptedClient::new(vec![
            Ok(tool_calls(&[("c1", "goto", json!({}))])),
            Ok(text("done")),
        ]);
        let handler = echo_handler();
        let mut engine = ConversationEngine::new(&client, &handler, vec![Message::user("x")], params())
            .with_observer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        engine.run_to_terminal().await.unwrap();
        // call, result, answer
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn round_limit_and_clear_terminal_force_extra_rounds() {
        let client = ScriptedClient::new(vec![
            Ok(tool_calls(&[("c1", "goto", json!({}))])),
            Ok(text("first")),
            Ok(text("second")),
        ]);
        let handler = echo_handler();
        let tool = ToolDefinition {
            name: "goto".into(),
            description: "navigate".into(),
            parameters: json!({"type": "object"}),
        };
        let mut engine = ConversationEngine::new(&client, &handler, vec![], params())
            .with_tools(vec![tool])
            .with_tool_round_limit(1);
        engine.run_to_terminal().await.unwrap();
        assert_eq!(engine.terminal_output(), Some("first"));

        engine.push_message(Message::user("try again"));
        engine.clear_terminal_output();
        engine.run_to_terminal().await.unwrap();
        assert_eq!(engine.terminal_output(), Some("second"));

        let requests = client.requests();
        assert_eq!(requests[0].tools.len(), 1);
        assert!(requests[1].tools.is_empty());
        assert_eq!(engine.rounds(), 3);
    }
}
