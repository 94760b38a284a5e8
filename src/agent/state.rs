//! Persisted agent state: phases, control requests and the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::Message;
use crate::pipeline::Artifact;
use crate::tools::{Clarification, OutputPayload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Acting,
    AwaitingUser,
    Paused,
    Complete,
    Error,
}

impl Phase {
    /// Wire name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Acting => "acting",
            Phase::AwaitingUser => "awaiting_user",
            Phase::Paused => "paused",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller request applied before an exchange runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Pause {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Resume,
    AddInstructions {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// A new or changed pipeline was produced.
    Updated,
    /// The produced pipeline equals the one the caller already has.
    Unchanged,
    /// Non-pipeline output was produced.
    Output,
    /// Waiting on an answer to a clarification question.
    Question,
    /// The agent signalled it is not done yet.
    Pending,
    Paused,
    Complete,
    /// The usage gate declined a request.
    Blocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl Status {
    /// Create a status stamped with the current time.
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Everything needed to resume a conversation, possibly in another process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub phase: Phase,
    /// Phase to restore when a pause is lifted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<Clarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation attempts used by the last exchange.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: usize,
    /// Conversation history of the last exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<Vec<Message>>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl AgentSnapshot {
    /// Create an idle snapshot for `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Apply one control request.
    pub fn apply_control(&mut self, request: &ControlRequest, now: DateTime<Utc>) {
        match request {
            ControlRequest::Pause { reason } => {
                if self.phase == Phase::Paused {
                    return;
                }
                self.resume_phase = Some(self.phase);
                self.phase = Phase::Paused;
                self.pause_reason = reason.clone();
                self.paused_at = Some(now);
            }
            ControlRequest::Resume => {
                if self.phase != Phase::Paused {
                    return;
                }
                self.phase = self.resume_phase.take().unwrap_or_default();
                self.pause_reason = None;
                self.paused_at = None;
            }
            ControlRequest::AddInstructions { text } => {
                self.instructions.push(text.clone());
                self.artifact = None;
                self.agent_state = None;
                self.pending_question = None;
                self.resume_phase = None;
                self.pause_reason = None;
                self.paused_at = None;
                self.phase = Phase::Idle;
            }
        }
    }
}

/// A conversation id plus its latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHandle {
    pub id: Uuid,
    pub snapshot: AgentSnapshot,
}

impl ConversationHandle {
    /// Wrap `snapshot` under a fresh conversation id.
    pub fn new(snapshot: AgentSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
        }
    }
}
