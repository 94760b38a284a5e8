//! Pipeline artifacts and the validator/compiler seams.
//!
//! A raw pipeline is a JSON object mapping step names to step definitions:
//!
//! ```json
//! { "goto1": { "node": "page::goto",
//!              "inputs": { "url": { "type": "constant", "value": "https://example.com" } },
//!              "outputs": {}, "dependsOn": [] } }
//! ```
//!
//! Validation and compilation are external concerns expressed as traits;
//! [`graph`] provides the reference implementations.

pub mod graph;
pub mod nodes;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ArtifactError;

pub use graph::{PipelineSchemaValidator, StepGraphCompiler};
pub use nodes::{builtin_node, builtin_nodes, FunctionCatalog, NodeSchema};

/// A validated pipeline: the raw candidate plus its compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub raw: Value,
    pub compiled: Value,
}

impl Artifact {
    /// Whether this artifact's raw form is structurally identical to `other`.
    pub fn same_pipeline(&self, other: &Value) -> bool {
        structurally_equal(&self.raw, other)
    }
}

/// Summary numbers returned to the model after a successful compile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub steps: usize,
    pub node_types: Vec<String>,
    pub entry_steps: Vec<String>,
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPipeline {
    pub compiled: Value,
    pub stats: PipelineStats,
}

/// Result of schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Checks a candidate against the pipeline schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, candidate: &Value) -> ValidationReport;
}

/// Compiles a schema-valid candidate. Must be deterministic.
pub trait PipelineCompiler: Send + Sync {
    fn compile(&self, raw: &Value) -> Result<CompiledPipeline, Vec<String>>;
}

/// Run schema validation and, only if it passes, compilation.
pub fn check_candidate(
    validator: &dyn SchemaValidator,
    compiler: &dyn PipelineCompiler,
    raw: &Value,
) -> Result<(Artifact, PipelineStats), ArtifactError> {
    let report = validator.validate(raw);
    if !report.valid {
        return Err(ArtifactError::Validation(report.errors));
    }
    let compiled = compiler.compile(raw).map_err(ArtifactError::Compile)?;
    Ok((
        Artifact {
            raw: raw.clone(),
            compiled: compiled.compiled,
        },
        compiled.stats,
    ))
}

/// Parse model text into a candidate, tolerating a surrounding Markdown
/// code fence.
pub fn parse_candidate(text: &str) -> Result<Value, ArtifactError> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid fence regex")
    });

    let body = fence
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();
    if body.is_empty() {
        return Err(ArtifactError::Parse("empty response".to_string()));
    }
    serde_json::from_str(body).map_err(|e| ArtifactError::Parse(e.to_string()))
}

/// Deep structural equality. Object key order never matters; array order
/// does.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, lv)| {
                    right
                        .get(key)
                        .map(|rv| structurally_equal(lv, rv))
                        .unwrap_or(false)
                })
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(lv, rv)| structurally_equal(lv, rv))
        }
        _ => a == b,
    }
}
