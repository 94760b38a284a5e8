//! Per-exchange working record written by the built-in tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

/// A question the agent is waiting on the user to answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
}

/// Non-pipeline data handed back to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPayload {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A side message sent during the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNote {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

/// What the built-in tools recorded during one exchange.
///
/// Lives only for the duration of the exchange; the agent folds it into the
/// snapshot once the exchange concludes.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ExchangeRecord {
    pub artifact: Option<Artifact>,
    /// Finish intent signalled by a tool: `Some(false)` means "not done".
    pub finished: Option<bool>,
    pub question: Option<Clarification>,
    pub output: Option<OutputPayload>,
    pub chat: Vec<ChatNote>,
}

impl ExchangeRecord {
    /// Whether a tool already decided how this exchange ends.
    pub fn has_outcome(&self) -> bool {
        self.artifact.is_some() || self.question.is_some() || self.finished.is_some()
    }
}
