//! Retry-until-valid: turn the engine's terminal text into a compiled
//! pipeline, feeding each failure back to the model as a diagnostic.

use tracing::{info, warn};

use crate::conversation::ConversationEngine;
use crate::error::{AgentError, ArtifactError};
use crate::llm::Message;
use crate::pipeline::{
    check_candidate, parse_candidate, Artifact, PipelineCompiler, PipelineStats, SchemaValidator,
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// How the workflow ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowResult {
    /// A terminal answer parsed, validated and compiled.
    Valid {
        artifact: Artifact,
        stats: PipelineStats,
    },
    /// The interrupt predicate fired; the caller decides the outcome.
    Deferred,
    /// Every attempt failed.
    Exhausted { last_error: ArtifactError },
    /// The usage gate vetoed a request.
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub result: WorkflowResult,
    /// Terminal answers that were checked.
    pub attempts: usize,
}

impl WorkflowOutcome {
    /// The compiled pipeline, when the workflow succeeded.
    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.result {
            WorkflowResult::Valid { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}

/// Drives an engine until its terminal answer is a valid pipeline or the
/// attempt budget runs out. The history stays on the engine.
pub struct RetryUntilValid<'a> {
    validator: &'a dyn SchemaValidator,
    compiler: &'a dyn PipelineCompiler,
    max_attempts: usize,
}

impl<'a> RetryUntilValid<'a> {
    /// Create a workflow allowing the default number of attempts.
    pub fn new(validator: &'a dyn SchemaValidator, compiler: &'a dyn PipelineCompiler) -> Self {
        Self {
            validator,
            compiler,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Allow up to `max_attempts` answers (at least one).
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run the loop. `interrupted` is polled around every drive of the
    /// engine; once it returns true the workflow stops with
    /// [`WorkflowResult::Deferred`].
    pub async fn run(
        &self,
        engine: &mut ConversationEngine<'_>,
        interrupted: impl Fn() -> bool,
    ) -> Result<WorkflowOutcome, AgentError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if !engine.is_terminal() {
                if interrupted() {
                    return Ok(outcome(WorkflowResult::Deferred, attempt - 1));
                }
                engine.run_to_terminal().await?;
            }
            if engine.was_vetoed() {
                return Ok(outcome(WorkflowResult::Blocked, attempt - 1));
            }
            if interrupted() {
                return Ok(outcome(WorkflowResult::Deferred, attempt - 1));
            }

            let text = engine.terminal_output().unwrap_or_default();
            let checked = parse_candidate(text)
                .and_then(|raw| check_candidate(self.validator, self.compiler, &raw));

            match checked {
                Ok((artifact, stats)) => {
                    info!(attempt, steps = stats.steps, "Terminal answer compiled");
                    return Ok(outcome(WorkflowResult::Valid { artifact, stats }, attempt));
                }
                Err(e) => {
                    warn!(attempt, stage = e.stage(), error = %e, "Terminal answer rejected");
                    if attempt < self.max_attempts {
                        engine.push_message(Message::user(diagnostic(&e)));
                        engine.clear_terminal_output();
                    }
                    last_error = Some(e);
                }
            }
        }

        let last_error =
            last_error.unwrap_or_else(|| ArtifactError::Parse("no answer produced".to_string()));
        warn!(attempts = self.max_attempts, "Giving up on a valid pipeline");
        Ok(outcome(
            WorkflowResult::Exhausted { last_error },
            self.max_attempts,
        ))
    }
}

fn outcome(result: WorkflowResult, attempts: usize) -> WorkflowOutcome {
    WorkflowOutcome { result, attempts }
}

/// The user message sent back after a rejected answer.
pub fn diagnostic(error: &ArtifactError) -> String {
    match error {
        ArtifactError::Parse(reason) => format!(
            "Your answer could not be parsed as JSON ({}). Reply with only the pipeline JSON object, no prose.",
            reason
        ),
        ArtifactError::Validation(errors) => format!(
            "The pipeline does not match the pipeline schema:\n{}\n\nFix these problems and reply with the corrected pipeline JSON.",
            bullet_list(errors)
        ),
        ArtifactError::Compile(errors) => format!(
            "The pipeline failed to compile:\n{}\n\nFix these problems and reply with the corrected pipeline JSON.",
            bullet_list(errors)
        ),
    }
}

fn bullet_list(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("- {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
