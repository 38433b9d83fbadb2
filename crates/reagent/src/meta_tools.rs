//! Tools the agent answers itself instead of dispatching to a plugin.
use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::json;

use crate::errors::ToolError;
use crate::executor::ToolExecutionResult;
use crate::models::tool::ToolDefinition;

pub const ACTIVATE_TOOLS: &str = "activate_tools";
pub const SUMMARIZE_CONVERSATION: &str = "summarize_conversation";

pub fn is_meta_tool(name: &str) -> bool {
    name == ACTIVATE_TOOLS || name == SUMMARIZE_CONVERSATION
}

/// Definition of `activate_tools`, offering only the categories still inactive
pub fn activate_tools_definition(inactive: &BTreeSet<String>) -> ToolDefinition {
    ToolDefinition::new(
        ACTIVATE_TOOLS,
        "Make additional groups of tools available. Call this when the task needs \
         tools from a category that is not active yet; the tools appear on the next step.",
        json!({
            "type": "object",
            "properties": {
                "categories": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": inactive.iter().collect::<Vec<_>>(),
                    },
                    "description": "Tool categories to activate",
                }
            },
            "required": ["categories"],
        }),
    )
}

pub fn summarize_conversation_definition() -> ToolDefinition {
    ToolDefinition::new(
        SUMMARIZE_CONVERSATION,
        "Replace the older part of this conversation with a short summary to free up \
         context. Recent messages are kept as they are.",
        json!({"type": "object", "properties": {}}),
    )
}

#[derive(Debug, Deserialize)]
struct ActivateToolsArgs {
    categories: Vec<String>,
}

pub fn parse_activate_args(arguments: &str) -> Result<Vec<String>, ToolError> {
    let args: ActivateToolsArgs = serde_json::from_str(arguments).map_err(|e| {
        ToolError::InvalidParameters(format!("expected {{\"categories\": [...]}}: {}", e))
    })?;
    Ok(args.categories)
}

/// Apply an `activate_tools` call to the conversation's active categories.
///
/// `None` means activation is unsupported here, so the call fails.
pub fn activate(
    active: Option<&mut BTreeSet<String>>,
    available: &BTreeSet<String>,
    arguments: &str,
) -> ToolExecutionResult {
    let Some(active) = active else {
        return ToolExecutionResult::Failure(
            ToolError::Unavailable("tool activation is not supported in this context".into())
                .to_string(),
        );
    };
    let requested = match parse_activate_args(arguments) {
        Ok(requested) => requested,
        Err(e) => return ToolExecutionResult::Failure(e.to_string()),
    };

    let mut activated = Vec::new();
    let mut already = Vec::new();
    let mut unknown = Vec::new();
    for category in requested {
        if !available.contains(&category) {
            unknown.push(category);
        } else if active.insert(category.clone()) {
            activated.push(category);
        } else if !already.contains(&category) {
            already.push(category);
        }
    }

    if activated.is_empty() && already.is_empty() {
        return ToolExecutionResult::Failure(format!(
            "Unknown tool categories: {}. Available categories: {}",
            unknown.join(", "),
            available.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }

    tracing::debug!(?activated, ?already, ?unknown, "activated tool categories");
    let mut report = Vec::new();
    if !activated.is_empty() {
        report.push(format!(
            "Activated: {}. Their tools are available from the next step.",
            activated.join(", ")
        ));
    }
    if !already.is_empty() {
        report.push(format!("Already active: {}.", already.join(", ")));
    }
    if !unknown.is_empty() {
        report.push(format!("Unknown and ignored: {}.", unknown.join(", ")));
    }
    ToolExecutionResult::Success(report.join(" "))
}
