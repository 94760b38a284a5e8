//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::conversation::ToolHandler;
use crate::error::ToolError;
use crate::llm::{LlmClient, LlmError, Message, ModelRequest, ModelResponse, ToolCall};

/// Model client that replays a fixed list of responses and records requests.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<ModelResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into())))
    }
}

pub fn text(content: &str) -> ModelResponse {
    ModelResponse {
        items: vec![Message::assistant(content)],
        usage: None,
    }
}

pub fn tool_calls(calls: &[(&str, &str, Value)]) -> ModelResponse {
    ModelResponse {
        items: calls
            .iter()
            .map(|(id, name, args)| {
                Message::ToolCall(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: args.to_string(),
                })
            })
            .collect(),
        usage: None,
    }
}

type HandlerFn = dyn Fn(&ToolCall) -> Result<Value, ToolError> + Send + Sync;

/// Tool handler backed by a closure.
pub struct FnHandler {
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new(f: impl Fn(&ToolCall) -> Result<Value, ToolError> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn handle(
        &self,
        call: &ToolCall,
        _history: &[Message],
        _cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        (self.f)(call)
    }
}
