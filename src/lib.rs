//! # Pipeline Agent
//!
//! Orchestration core of an LLM browser-automation agent.
//!
//! This library provides:
//! - A bounded, cancellable conversation engine over any chat model
//! - A tool dispatcher that forwards browsing actions and services the
//!   built-in pipeline tools
//! - A retry-until-valid workflow that turns model answers into compiled
//!   pipelines
//! - A resumable state machine that produces serializable snapshots
//!
//! ## Architecture
//!
//! The engine follows the "tools in a loop" pattern:
//! 1. Send history and tool declarations to the model
//! 2. Run any requested tool calls and feed the results back
//! 3. Stop on a plain answer, which is validated and compiled as a pipeline
//! 4. Record the outcome in the snapshot so the caller can pause or resume
//!
//! ## Example
//!
//! ```rust,ignore
//! use pipeline_agent::{AgentConfig, PipelineAgent};
//!
//! let config = AgentConfig::from_env()?;
//! let agent = PipelineAgent::new(client, executor, validator, compiler, config.agent_options());
//! let handle = agent.start_exchange("Get the title of example.com", None, &[], cancel).await?;
//! ```

pub mod actions;
pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod tools;
pub mod usage;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use agent::{
    AgentOptions, AgentSnapshot, ControlRequest, ConversationHandle, ExchangeCallbacks, Phase,
    PipelineAgent, Status, StatusKind,
};
pub use config::AgentConfig;
pub use conversation::{ConversationEngine, EngineParams, StepOutcome, ToolHandler};
pub use error::{AgentError, ArtifactError, ToolError};
pub use store::{InMemorySnapshotStore, JsonFileSnapshotStore, SnapshotStore, StoreError};
