//! Reference validator and compiler for step-graph pipelines.
//!
//! The compiler resolves step dependencies into a deterministic execution
//! order (Kahn's algorithm, ties broken by step name) and checks that every
//! reference input points at a declared dependency.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use super::nodes::builtin_node;
use super::{CompiledPipeline, PipelineCompiler, PipelineStats, SchemaValidator, ValidationReport};
use crate::schema::Schema;

/// Schema of a single input binding.
fn binding_schema() -> Schema {
    Schema::object()
        .property("type", Schema::one_of(&["constant", "reference"]), true)
        .property("value", Schema::any(), false)
        .property("step", Schema::string(), false)
        .property("output", Schema::string(), false)
}

/// Schema of a raw pipeline.
pub fn pipeline_schema() -> Schema {
    let step = Schema::object()
        .property("node", Schema::string(), true)
        .property("inputs", Schema::map_of(binding_schema()), true)
        .property("outputs", Schema::object(), false)
        .property("dependsOn", Schema::array(Schema::string()), false);
    Schema::map_of(step).describe("Mapping of step name to step definition")
}

/// Validates candidates against [`pipeline_schema`].
#[derive(Debug, Clone)]
pub struct PipelineSchemaValidator {
    schema: Schema,
}

impl PipelineSchemaValidator {
    pub fn new() -> Self {
        Self {
            schema: pipeline_schema(),
        }
    }
}

impl Default for PipelineSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator for PipelineSchemaValidator {
    fn validate(&self, candidate: &Value) -> ValidationReport {
        let mut errors = self.schema.validate(candidate);
        if candidate.as_object().is_some_and(Map::is_empty) {
            errors.push("/: pipeline has no steps".to_string());
        }
        ValidationReport::from_errors(errors)
    }
}

/// Compiles step graphs into `{ "order": [...], "steps": {...} }`.
///
/// When `strict_nodes` is set, node types must be built-ins and their
/// required inputs must be bound.
#[derive(Debug, Clone, Default)]
pub struct StepGraphCompiler {
    pub strict_nodes: bool,
}

impl StepGraphCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict_nodes: true }
    }
}

struct Step<'a> {
    node: &'a str,
    inputs: &'a Map<String, Value>,
    depends_on: BTreeSet<&'a str>,
}

impl PipelineCompiler for StepGraphCompiler {
    fn compile(&self, raw: &Value) -> Result<CompiledPipeline, Vec<String>> {
        let Some(definitions) = raw.as_object() else {
            return Err(vec!["pipeline must be an object".to_string()]);
        };

        let empty = Map::new();
        let mut errors = Vec::new();
        let mut steps: BTreeMap<&str, Step<'_>> = BTreeMap::new();

        for (name, definition) in definitions {
            let node = definition["node"].as_str().unwrap_or_default();
            let inputs = definition["inputs"].as_object().unwrap_or(&empty);
            let depends_on: BTreeSet<&str> = definition["dependsOn"]
                .as_array()
                .map(|deps| deps.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            if node.split_once("::").map_or(true, |(ns, n)| ns.is_empty() || n.is_empty()) {
                errors.push(format!(
                    "step '{}': node type '{}' must be of the form namespace::name",
                    name, node
                ));
            } else if self.strict_nodes {
                match builtin_node(node) {
                    None => errors.push(format!("step '{}': unknown node type '{}'", name, node)),
                    Some(schema) => {
                        for input in schema.required_inputs() {
                            if !inputs.contains_key(input) {
                                errors.push(format!(
                                    "step '{}': missing required input '{}' for {}",
                                    name, input, node
                                ));
                            }
                        }
                    }
                }
            }

            steps.insert(
                name.as_str(),
                Step {
                    node,
                    inputs,
                    depends_on,
                },
            );
        }

        for (name, step) in &steps {
            for dep in &step.depends_on {
                if dep == name {
                    errors.push(format!("step '{}' depends on itself", name));
                } else if !steps.contains_key(dep) {
                    errors.push(format!("step '{}' depends on unknown step '{}'", name, dep));
                }
            }
            for (input, binding) in step.inputs {
                if binding["type"] != "reference" {
                    continue;
                }
                match binding["step"].as_str() {
                    None => errors.push(format!(
                        "step '{}': reference input '{}' has no source step",
                        name, input
                    )),
                    Some(source) if !step.depends_on.contains(source) => errors.push(format!(
                        "step '{}': input '{}' references '{}' which is not in dependsOn",
                        name, input, source
                    )),
                    Some(_) => {}
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let order = execution_order(&steps)?;

        let compiled_steps: Map<String, Value> = steps
            .iter()
            .map(|(name, step)| {
                (
                    name.to_string(),
                    json!({
                        "node": step.node,
                        "inputs": step.inputs,
                        "dependsOn": step.depends_on.iter().collect::<Vec<_>>(),
                    }),
                )
            })
            .collect();

        let node_types: BTreeSet<&str> = steps.values().map(|s| s.node).collect();
        let entry_steps: Vec<String> = steps
            .iter()
            .filter(|(_, s)| s.depends_on.is_empty())
            .map(|(name, _)| name.to_string())
            .collect();

        Ok(CompiledPipeline {
            compiled: json!({ "order": order, "steps": compiled_steps }),
            stats: PipelineStats {
                steps: steps.len(),
                node_types: node_types.into_iter().map(String::from).collect(),
                entry_steps,
            },
        })
    }
}

fn execution_order(steps: &BTreeMap<&str, Step<'_>>) -> Result<Vec<String>, Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = steps
        .iter()
        .map(|(name, step)| (*name, step.depends_on.len()))
        .collect();
    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(next) = ready.pop_first() {
        pending.remove(next);
        order.push(next.to_string());
        for (name, step) in steps {
            if step.depends_on.contains(next) {
                if let Some(count) = pending.get_mut(name) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*name);
                    }
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        let cycle: Vec<&str> = pending.keys().copied().collect();
        Err(vec![format!(
            "dependency cycle between steps: {}",
            cycle.join(", ")
        )])
    }
}
