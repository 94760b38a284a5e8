//! Hooks the agent calls as an exchange concludes.

use async_trait::async_trait;
use uuid::Uuid;

use super::state::Status;
use crate::llm::Message;
use crate::pipeline::Artifact;
use crate::tools::{ChatNote, OutputPayload};

/// Observer of exchange results. Every hook defaults to a no-op.
///
/// Per exchange the agent calls `on_raw_messages` once, then `on_chat` for
/// each side message, `on_output` and `on_artifact_update` at most once,
/// and finally `on_status` exactly once. A resume that does not run the
/// model only calls `on_status`.
#[async_trait]
pub trait ExchangeCallbacks: Send + Sync {
    async fn on_raw_messages(&self, _id: Uuid, _messages: &[Message]) {}

    async fn on_chat(&self, _id: Uuid, _note: &ChatNote) {}

    async fn on_output(&self, _id: Uuid, _output: &OutputPayload) {}

    /// Only called when the pipeline differs from the caller's previous one.
    async fn on_artifact_update(&self, _id: Uuid, _artifact: &Artifact) {}

    async fn on_status(&self, _id: Uuid, _status: &Status) {}
}

pub struct NoopCallbacks;

#[async_trait]
impl ExchangeCallbacks for NoopCallbacks {}

/// Callbacks that report through `tracing`.
pub struct LoggingCallbacks;

#[async_trait]
impl ExchangeCallbacks for LoggingCallbacks {
    async fn on_raw_messages(&self, id: Uuid, messages: &[Message]) {
        tracing::debug!(conversation = %id, messages = messages.len(), "Exchange history");
    }

    async fn on_chat(&self, id: Uuid, note: &ChatNote) {
        tracing::info!(conversation = %id, audience = ?note.audience, "{}", note.message);
    }

    async fn on_output(&self, id: Uuid, output: &OutputPayload) {
        tracing::info!(conversation = %id, data = %output.data, "Agent output");
    }

    async fn on_artifact_update(&self, id: Uuid, artifact: &Artifact) {
        tracing::info!(conversation = %id, steps = artifact.raw.as_object().map_or(0, |m| m.len()), "Pipeline updated");
    }

    async fn on_status(&self, id: Uuid, status: &Status) {
        tracing::info!(conversation = %id, kind = ?status.kind, "{}", status.message);
    }
}
