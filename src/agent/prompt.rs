//! Prompt templates for the pipeline agent.

use serde_json::Value;

use crate::llm::ToolDefinition;

/// Build the system prompt listing the available tools.
pub fn build_system_prompt(
    tools: &[ToolDefinition],
    previous: Option<&Value>,
    expect_artifact: bool,
) -> String {
    let tool_descriptions = tools
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    let previous_section = match previous {
        Some(pipeline) => format!(
            "The user already has this pipeline. Change only what the request asks for:\n```json\n{}\n```",
            serde_json::to_string_pretty(pipeline).unwrap_or_else(|_| pipeline.to_string())
        ),
        None => "The user has no pipeline yet.".to_string(),
    };

    let answer_rule = if expect_artifact {
        "If you finish without calling emit_artifact, your final answer must be only the pipeline JSON object, with no prose around it."
    } else {
        "When you are done, call emit_artifact or provide_output, then reply with a one-line summary."
    };

    format!(
        r#"You are a browser automation agent. You turn the user's request into a pipeline: a JSON object mapping step names to steps. Each step has a "node" type (namespace::name), "inputs" (each a {{"type": "constant", "value": ...}} or {{"type": "reference", "step": ..., "output": ...}} binding), "outputs" and "dependsOn" (names of the steps it needs).

## Your Capabilities

You have access to the following tools:
{tool_descriptions}

## Current State

{previous_section}

## Rules and Guidelines

1. **Look before you build** - Use the browsing tools to inspect the target page, and get_node_schema to check a node's inputs before using it.

2. **Validate early** - Run validate_artifact on drafts and fix every reported error.

3. **Ask when blocked** - If the request is ambiguous, call request_user_input and end your turn.

4. **Stay focused** - Only build what was asked for.

## Response Format

{answer_rule}"#,
        tool_descriptions = tool_descriptions,
        previous_section = previous_section,
        answer_rule = answer_rule
    )
}

/// The user turn: the original prompt plus any instructions added since.
pub fn build_user_message(prompt: &str, instructions: &[String]) -> String {
    if instructions.is_empty() {
        return prompt.to_string();
    }
    let extra = instructions
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nAdditional instructions:\n{}", prompt, extra)
}
