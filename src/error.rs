//! Error types shared across the orchestration layers.

use thiserror::Error;

use crate::llm::LlmError;

/// Errors that escape an exchange.
///
/// Tool failures and artifact failures never show up here: the first are
/// written into history for the model to react to, the second are retried
/// by the validation workflow.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The remote model call failed outside the degrade-retry case.
    #[error("model transport error: {0}")]
    Transport(#[from] LlmError),

    /// The cancellation token fired.
    #[error("exchange cancelled")]
    Cancelled,

    /// The caller drove the agent in a way that can never succeed.
    #[error("invalid use: {0}")]
    Misuse(String),
}

impl AgentError {
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure while servicing a tool call. Rendered into the tool result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("schema not found for node type '{0}'")]
    SchemaNotFound(String),

    #[error("{0}")]
    Collaborator(#[from] anyhow::Error),

    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn invalid_arguments(tool: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Why a candidate artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("not valid JSON: {0}")]
    Parse(String),

    #[error("schema validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("compilation failed: {}", .0.join("; "))]
    Compile(Vec<String>),
}

impl ArtifactError {
    /// Which stage rejected the candidate.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Validation(_) => "schema",
            Self::Compile(_) => "compile",
        }
    }

    pub fn errors(&self) -> Vec<String> {
        match self {
            Self::Parse(e) => vec![e.clone()],
            Self::Validation(errors) | Self::Compile(errors) => errors.clone(),
        }
    }
}
