//! OpenAI-compatible chat completions client.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, OpenRouter, local gateways). Rejections of optional parameters
//! are classified as [`LlmError::UnsupportedParameter`] so the conversation
//! engine can degrade the request instead of failing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    LlmClient, LlmError, Message, ModelRequest, ModelResponse, ResponseFormat, Role, TokenUsage,
    ToolCall,
};

/// HTTP client for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let body = request_body(request);

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if status.is_client_error() {
                if let Some(param) = unsupported_parameter(&text) {
                    return Err(LlmError::UnsupportedParameter {
                        param,
                        message: text,
                    });
                }
            }
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, truncate(&text, 200))))?;
        parse_completion(parsed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn request_body(request: &ModelRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": wire_messages(&request.messages),
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
    }
    if let Some(format) = request.response_format {
        body["response_format"] = match format {
            ResponseFormat::Text => json!({ "type": "text" }),
            ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        };
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Convert flat history into chat messages.
///
/// Tool calls are folded into the assistant message that immediately
/// precedes them (or a fresh one), as the chat dialect requires.
fn wire_messages(history: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(history.len());
    let mut open_assistant = false;

    for message in history {
        match message {
            Message::Text { role, content } => {
                out.push(json!({ "role": role.as_str(), "content": content }));
                open_assistant = *role == Role::Assistant;
            }
            Message::ToolCall(call) => {
                let wire_call = json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                });
                if open_assistant {
                    if let Some(last) = out.last_mut() {
                        match last.get_mut("tool_calls").and_then(Value::as_array_mut) {
                            Some(calls) => calls.push(wire_call),
                            None => last["tool_calls"] = json!([wire_call]),
                        }
                        continue;
                    }
                }
                out.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": [wire_call],
                }));
                open_assistant = true;
            }
            Message::ToolResult { call_id, output, .. } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output,
                }));
                open_assistant = false;
            }
        }
    }
    out
}

fn parse_completion(response: CompletionResponse) -> Result<ModelResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

    let mut items = Vec::new();
    let content = choice.message.content.filter(|c| !c.trim().is_empty());
    let has_calls = !choice.message.tool_calls.is_empty();

    if let Some(content) = content {
        items.push(Message::assistant(content));
    }
    for call in choice.message.tool_calls {
        items.push(Message::ToolCall(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }));
    }
    // A reply with neither text nor calls still ends the round as an
    // (empty) answer so callers can react to it.
    if items.is_empty() && !has_calls {
        items.push(Message::assistant(String::new()));
    }

    Ok(ModelResponse {
        items,
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

/// Extract the rejected parameter name from an error body, if the body
/// says an optional parameter is not supported for this model.
fn unsupported_parameter(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let error = envelope.error;
    let code = error.code.as_deref().unwrap_or_default();
    let unsupported = matches!(code, "unsupported_parameter" | "unsupported_value")
        || error.message.to_lowercase().contains("not supported with this model");
    if !unsupported {
        return None;
    }
    error.param.filter(|p| !p.is_empty())
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
