//! Agent module - the resumable state machine around the conversation engine.
//!
//! Each exchange follows the same shape:
//! 1. Apply the caller's control requests to the snapshot
//! 2. If the conversation is idle, build the prompt and run the engine
//! 3. Validate a plain terminal answer as a pipeline, retrying on failure
//! 4. Resolve the next phase, fire callbacks, and store the new snapshot

mod agent_loop;
mod callbacks;
mod prompt;
mod state;

pub use agent_loop::{AgentOptions, PipelineAgent};
pub use callbacks::{ExchangeCallbacks, LoggingCallbacks, NoopCallbacks};
pub use prompt::{build_system_prompt, build_user_message};
pub use state::{AgentSnapshot, ControlRequest, ConversationHandle, Phase, Status, StatusKind};
