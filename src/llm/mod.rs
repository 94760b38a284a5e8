//! LLM client abstraction and the conversation data model.
//!
//! History is a flat, append-only list of [`Message`] items. A single model
//! response may produce several items (assistant text and/or tool calls);
//! tool results are appended by the conversation engine afterwards.

mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Role of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the matching result.
    pub id: String,
    /// Name of the tool being invoked.
    pub name: String,
    /// Raw JSON arguments, exactly as the model produced them.
    pub arguments: String,
}

impl ToolCall {
    /// Parse the raw arguments. Empty arguments are treated as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Role-tagged text.
    Text { role: Role, content: String },
    /// A tool call issued by the model.
    ToolCall(ToolCall),
    /// Outcome of a tool call. `is_error` marks absorbed handler failures.
    ToolResult {
        call_id: String,
        name: String,
        output: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::Text {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::Text {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Text {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// The assistant text of this item, if it is a plain model message.
    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            Message::Text {
                role: Role::Assistant,
                content,
            } => Some(content),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Message::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Declaration of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// Output-shape constraint for the model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// A single request to the remote model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub response_format: Option<ResponseFormat>,
    pub temperature: Option<f32>,
}

impl ModelRequest {
    /// Copy of this request with the named optional parameter removed.
    ///
    /// Returns `None` when the request does not carry that parameter, in
    /// which case stripping cannot change the outcome.
    pub fn without_parameter(&self, param: &str) -> Option<ModelRequest> {
        let mut stripped = self.clone();
        match param {
            "temperature" if self.temperature.is_some() => stripped.temperature = None,
            "response_format" if self.response_format.is_some() => {
                stripped.response_format = None
            }
            "tools" | "tool_choice" if !self.tools.is_empty() => stripped.tools.clear(),
            _ => return None,
        }
        Some(stripped)
    }
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Ordered response items plus usage counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub items: Vec<Message>,
    pub usage: Option<TokenUsage>,
}

/// Errors from the model transport.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model rejected an optional request parameter.
    #[error("parameter '{param}' is not supported by this model: {message}")]
    UnsupportedParameter { param: String, message: String },

    #[error("model endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request to model endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// A remote chat model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}
