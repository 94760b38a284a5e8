//! Built-in pipeline-management tools.

use serde::Deserialize;
use serde_json::{json, Value};

use super::record::Urgency;

/// The closed set of tools the agent services itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    GetNodeSchema,
    ListNodeTypes,
    GetPreviousArtifact,
    ValidateArtifact,
    EmitArtifact,
    RequestUserInput,
    ProvideOutput,
    Chat,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 8] = [
        BuiltinTool::GetNodeSchema,
        BuiltinTool::ListNodeTypes,
        BuiltinTool::GetPreviousArtifact,
        BuiltinTool::ValidateArtifact,
        BuiltinTool::EmitArtifact,
        BuiltinTool::RequestUserInput,
        BuiltinTool::ProvideOutput,
        BuiltinTool::Chat,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::GetNodeSchema => "get_node_schema",
            BuiltinTool::ListNodeTypes => "list_node_types",
            BuiltinTool::GetPreviousArtifact => "get_previous_artifact",
            BuiltinTool::ValidateArtifact => "validate_artifact",
            BuiltinTool::EmitArtifact => "emit_artifact",
            BuiltinTool::RequestUserInput => "request_user_input",
            BuiltinTool::ProvideOutput => "provide_output",
            BuiltinTool::Chat => "chat",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinTool::GetNodeSchema => {
                "Get the input/output schema of a pipeline node type (e.g. 'page::goto')."
            }
            BuiltinTool::ListNodeTypes => "List the node types available to pipelines.",
            BuiltinTool::GetPreviousArtifact => {
                "Return the pipeline the user currently has, or null if there is none."
            }
            BuiltinTool::ValidateArtifact => {
                "Validate and compile a candidate pipeline without saving it. Set dry_run to also get the compiled execution plan."
            }
            BuiltinTool::EmitArtifact => {
                "Validate, compile and save a pipeline as the result of this conversation."
            }
            BuiltinTool::RequestUserInput => {
                "Ask the user a clarifying question. End your turn after calling this."
            }
            BuiltinTool::ProvideOutput => {
                "Return data to the user that is not a pipeline (e.g. extracted values)."
            }
            BuiltinTool::Chat => "Send a short progress message to the user.",
        }
    }

    pub fn parameters_schema(&self) -> Value {
        let candidate = json!({
            "description": "The pipeline: an object mapping step names to step definitions, or the same as a JSON string"
        });
        match self {
            BuiltinTool::GetNodeSchema => json!({
                "type": "object",
                "properties": {
                    "node_type": {
                        "type": "string",
                        "description": "Fully qualified node type, namespace::name"
                    }
                },
                "required": ["node_type"]
            }),
            BuiltinTool::ListNodeTypes | BuiltinTool::GetPreviousArtifact => json!({
                "type": "object",
                "properties": {}
            }),
            BuiltinTool::ValidateArtifact => json!({
                "type": "object",
                "properties": {
                    "candidate": candidate,
                    "dry_run": {
                        "type": "boolean",
                        "description": "Also return the compiled execution plan (default: false)"
                    }
                },
                "required": ["candidate"]
            }),
            BuiltinTool::EmitArtifact => json!({
                "type": "object",
                "properties": {
                    "candidate": candidate,
                    "final": {
                        "type": "boolean",
                        "description": "Whether the pipeline is finished (default: true)"
                    }
                },
                "required": ["candidate"]
            }),
            BuiltinTool::RequestUserInput => json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" },
                    "urgency": { "type": "string", "enum": ["low", "normal", "high"] }
                },
                "required": ["question"]
            }),
            BuiltinTool::ProvideOutput => json!({
                "type": "object",
                "properties": {
                    "data": { "description": "Any JSON value" },
                    "description": { "type": "string" },
                    "final": {
                        "type": "boolean",
                        "description": "true completes the request; false asks to keep working (default: unset)"
                    }
                },
                "required": ["data"]
            }),
            BuiltinTool::Chat => json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" },
                    "audience": { "type": "string" }
                },
                "required": ["message"]
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GetNodeSchemaArgs {
    pub node_type: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidateArgs {
    pub candidate: Value,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct EmitArgs {
    pub candidate: Value,
    #[serde(default = "default_true", rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct RequestUserInputArgs {
    pub question: String,
    #[serde(default)]
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProvideOutputArgs {
    pub data: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "final")]
    pub is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatArgs {
    pub message: String,
    #[serde(default)]
    pub audience: Option<String>,
}

fn default_true() -> bool {
    true
}
