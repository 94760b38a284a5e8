//! Tool dispatch for one exchange.
//!
//! A tool call name resolves to either a built-in pipeline tool (see
//! [`BuiltinTool`]) or a pass-through browsing action owned by the
//! [`ActionExecutor`]. Anything else is an unknown tool, which the engine
//! reports back to the model as an error result.

mod builtin;
mod record;

pub use builtin::BuiltinTool;
pub(crate) use record::ExchangeRecord;
pub use record::{ChatNote, Clarification, OutputPayload, Urgency};

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::actions::ActionExecutor;
use crate::conversation::ToolHandler;
use crate::error::{ArtifactError, ToolError};
use crate::llm::{Message, ToolCall, ToolDefinition};
use crate::pipeline::{
    builtin_node, builtin_nodes, check_candidate, FunctionCatalog, PipelineCompiler,
    SchemaValidator,
};

use builtin::{
    ChatArgs, EmitArgs, GetNodeSchemaArgs, ProvideOutputArgs, RequestUserInputArgs, ValidateArgs,
};

/// Where a tool call goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Builtin(BuiltinTool),
    Action,
}

/// Services the tool calls of a single exchange.
pub struct ToolDispatcher {
    executor: Arc<dyn ActionExecutor>,
    validator: Arc<dyn SchemaValidator>,
    compiler: Arc<dyn PipelineCompiler>,
    catalog: Option<Arc<dyn FunctionCatalog>>,
    previous: Option<Value>,
    actions: Vec<ToolDefinition>,
    action_names: HashSet<String>,
    record: Mutex<ExchangeRecord>,
}

impl ToolDispatcher {
    /// Create a dispatcher over the executor actions and the built-in tools.
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        validator: Arc<dyn SchemaValidator>,
        compiler: Arc<dyn PipelineCompiler>,
    ) -> Self {
        let mut actions = executor.actions();
        actions.retain(|a| {
            let shadowed = BuiltinTool::from_name(&a.name).is_some();
            if shadowed {
                tracing::warn!(action = %a.name, "Action name collides with a built-in tool, ignoring it");
            }
            !shadowed
        });
        let action_names = actions.iter().map(|a| a.name.clone()).collect();

        Self {
            executor,
            validator,
            compiler,
            catalog: None,
            previous: None,
            actions,
            action_names,
            record: Mutex::new(ExchangeRecord::default()),
        }
    }

    /// Serve node schemas from `catalog` as well as the built-in nodes.
    pub fn with_catalog(mut self, catalog: Arc<dyn FunctionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// The pipeline the caller already has, returned by `get_previous_artifact`.
    pub fn with_previous(mut self, previous: Option<Value>) -> Self {
        self.previous = previous;
        self
    }

    /// Declarations for every tool this dispatcher accepts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        BuiltinTool::ALL
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .chain(self.actions.iter().cloned())
            .collect()
    }

    /// Whether a built-in tool already decided the exchange outcome.
    pub(crate) fn has_outcome(&self) -> bool {
        self.record().has_outcome()
    }

    /// Consume the dispatcher, yielding what the tools recorded.
    pub(crate) fn into_record(self) -> ExchangeRecord {
        self.record
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self) -> MutexGuard<'_, ExchangeRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, name: &str) -> Result<Route, ToolError> {
        if let Some(tool) = BuiltinTool::from_name(name) {
            return Ok(Route::Builtin(tool));
        }
        if self.action_names.contains(name) {
            return Ok(Route::Action);
        }
        Err(ToolError::UnknownTool(name.to_string()))
    }

    async fn run_builtin(&self, tool: BuiltinTool, args: Value) -> Result<Value, ToolError> {
        match tool {
            BuiltinTool::GetNodeSchema => {
                let args: GetNodeSchemaArgs = parse_args(tool, args)?;
                self.node_schema(&args.node_type).await
            }
            BuiltinTool::ListNodeTypes => self.list_node_types().await,
            BuiltinTool::GetPreviousArtifact => Ok(self.previous.clone().unwrap_or(Value::Null)),
            BuiltinTool::ValidateArtifact => {
                let args: ValidateArgs = parse_args(tool, args)?;
                let raw = candidate_value(args.candidate)?;
                Ok(match check_candidate(&*self.validator, &*self.compiler, &raw) {
                    Ok((artifact, stats)) => {
                        let mut result = json!({ "valid": true, "stats": stats });
                        if args.dry_run {
                            result["plan"] = artifact.compiled;
                        }
                        result
                    }
                    Err(e) => rejection("valid", &e),
                })
            }
            BuiltinTool::EmitArtifact => {
                let args: EmitArgs = parse_args(tool, args)?;
                let raw = candidate_value(args.candidate)?;
                Ok(match check_candidate(&*self.validator, &*self.compiler, &raw) {
                    Ok((artifact, stats)) => {
                        let mut record = self.record();
                        record.artifact = Some(artifact);
                        record.finished = Some(args.is_final);
                        tracing::info!(steps = stats.steps, is_final = args.is_final, "Pipeline emitted");
                        json!({ "emitted": true, "final": args.is_final, "stats": stats })
                    }
                    Err(e) => rejection("emitted", &e),
                })
            }
            BuiltinTool::RequestUserInput => {
                let args: RequestUserInputArgs = parse_args(tool, args)?;
                let mut record = self.record();
                record.question = Some(Clarification {
                    question: args.question,
                    urgency: args.urgency,
                });
                record.finished = Some(false);
                Ok(json!({
                    "recorded": true,
                    "note": "The question will be shown to the user. End your turn now."
                }))
            }
            BuiltinTool::ProvideOutput => {
                let args: ProvideOutputArgs = parse_args(tool, args)?;
                let mut record = self.record();
                record.output = Some(OutputPayload {
                    data: args.data,
                    description: args.description,
                });
                if let Some(is_final) = args.is_final {
                    record.finished = Some(is_final);
                }
                Ok(json!({ "recorded": true, "final": args.is_final.unwrap_or(false) }))
            }
            BuiltinTool::Chat => {
                let args: ChatArgs = parse_args(tool, args)?;
                self.record().chat.push(ChatNote {
                    message: args.message,
                    audience: args.audience,
                });
                Ok(json!({ "delivered": true }))
            }
        }
    }

    async fn node_schema(&self, node_type: &str) -> Result<Value, ToolError> {
        if let Some(schema) = builtin_node(node_type) {
            return Ok(json!(schema));
        }
        if let (Some(catalog), Some((namespace, name))) =
            (&self.catalog, node_type.split_once("::"))
        {
            if let Some(schema) = catalog.get_function(namespace, name).await? {
                return Ok(json!(schema));
            }
        }
        Err(ToolError::SchemaNotFound(node_type.to_string()))
    }

    async fn list_node_types(&self) -> Result<Value, ToolError> {
        let builtin: Vec<String> = builtin_nodes().into_iter().map(|n| n.node).collect();
        let mut catalog = BTreeMap::new();
        if let Some(functions) = &self.catalog {
            for namespace in functions.list_namespaces().await? {
                let names = functions.list_functions(&namespace).await?;
                catalog.insert(namespace, names);
            }
        }
        Ok(json!({ "builtin": builtin, "catalog": catalog }))
    }
}

#[async_trait]
impl ToolHandler for ToolDispatcher {
    async fn handle(
        &self,
        call: &ToolCall,
        _history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let route = self.route(&call.name)?;
        let args = call
            .parsed_arguments()
            .map_err(|e| ToolError::invalid_arguments(&call.name, e))?;

        match route {
            Route::Builtin(tool) => self.run_builtin(tool, args).await,
            Route::Action => {
                let result = self.executor.execute(&call.name, args, cancel).await;
                if cancel.is_cancelled() {
                    return Err(ToolError::Cancelled);
                }
                Ok(result?)
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: BuiltinTool, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments(tool.name(), e))
}

/// Accept a candidate as JSON or as a JSON-encoded string.
fn candidate_value(candidate: Value) -> Result<Value, ToolError> {
    match candidate {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| ToolError::InvalidInput(format!("candidate is not valid JSON: {}", e))),
        other => Ok(other),
    }
}

fn rejection(flag: &str, error: &ArtifactError) -> Value {
    let mut result = json!({ "stage": error.stage(), "errors": error.errors() });
    result[flag] = Value::Bool(false);
    result
}
