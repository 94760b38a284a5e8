//! Node type descriptors: the built-in browser nodes and the optional
//! external function catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Inputs/outputs contract of one pipeline node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    /// Fully qualified type, `namespace::name`.
    pub node: String,
    pub description: String,
    pub inputs: Schema,
    pub outputs: Schema,
}

impl NodeSchema {
    /// Names of inputs the node cannot run without.
    pub fn required_inputs(&self) -> &[String] {
        match &self.inputs {
            Schema::Object { required, .. } => required,
            _ => &[],
        }
    }
}

/// Lookup service for node types beyond the built-ins.
#[async_trait]
pub trait FunctionCatalog: Send + Sync {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>>;

    async fn list_functions(&self, namespace: &str) -> anyhow::Result<Vec<String>>;

    async fn get_function(&self, namespace: &str, name: &str)
        -> anyhow::Result<Option<NodeSchema>>;
}

fn node(name: &str, description: &str, inputs: Schema, outputs: Schema) -> NodeSchema {
    NodeSchema {
        node: name.to_string(),
        description: description.to_string(),
        inputs,
        outputs,
    }
}

/// The node types every pipeline may use.
pub fn builtin_nodes() -> Vec<NodeSchema> {
    let selector = || Schema::string().describe("CSS selector of the target element");
    vec![
        node(
            "page::goto",
            "Navigate the page to a URL and wait for it to load.",
            Schema::object().property("url", Schema::string().describe("Absolute URL"), true),
            Schema::object().property("status", Schema::integer(), false),
        ),
        node(
            "page::title",
            "Read the document title of the current page.",
            Schema::object(),
            Schema::object().property("title", Schema::string(), true),
        ),
        node(
            "page::click",
            "Click an element.",
            Schema::object().property("selector", selector(), true),
            Schema::object(),
        ),
        node(
            "page::type_text",
            "Type text into an input element.",
            Schema::object()
                .property("selector", selector(), true)
                .property("text", Schema::string(), true),
            Schema::object(),
        ),
        node(
            "page::extract_text",
            "Extract the text content of every element matching a selector.",
            Schema::object().property("selector", selector(), true),
            Schema::object().property("texts", Schema::array(Schema::string()), true),
        ),
        node(
            "page::wait_for",
            "Wait until an element matching a selector is visible.",
            Schema::object()
                .property("selector", selector(), true)
                .property("timeout_ms", Schema::integer(), false),
            Schema::object(),
        ),
    ]
}

/// Look up a built-in node type.
pub fn builtin_node(node_type: &str) -> Option<NodeSchema> {
    builtin_nodes().into_iter().find(|n| n.node == node_type)
}
