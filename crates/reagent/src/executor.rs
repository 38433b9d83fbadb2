use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::errors::ToolError;
use crate::models::tool::ToolCall;
use crate::registry::ToolRegistry;

/// Leading line of the tool message content for a failed call
pub const TOOL_ERROR_PREFIX: &str = "The tool call returned the following error:";

/// Outcome of one tool call, fed back to the model as a tool message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolExecutionResult {
    Success(String),
    Failure(String),
}

impl ToolExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    /// Text placed in the tool message the model sees
    pub fn to_content(&self) -> String {
        match self {
            ToolExecutionResult::Success(output) => output.clone(),
            ToolExecutionResult::Failure(error) => {
                format!("{}\n{}", TOOL_ERROR_PREFIX, error)
            }
        }
    }
}

impl From<Result<String, ToolError>> for ToolExecutionResult {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(output) => ToolExecutionResult::Success(output),
            Err(err) => ToolExecutionResult::Failure(err.to_string()),
        }
    }
}

/// Runs batches of tool calls against a registry.
///
/// Calls in a batch run concurrently; results always come back in the order
/// of the input calls. A failing or panicking tool only affects its own slot.
/// Nothing is retried here.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolExecutor;

impl ToolExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute_batch(
        &self,
        tool_calls: &[ToolCall],
        registry: &ToolRegistry,
    ) -> Vec<ToolExecutionResult> {
        let futures: Vec<_> = tool_calls
            .iter()
            .map(|call| Self::execute_one(call, registry))
            .collect();

        // join_all keeps input order regardless of completion order
        futures::future::join_all(futures).await
    }

    async fn execute_one(call: &ToolCall, registry: &ToolRegistry) -> ToolExecutionResult {
        let Some(entry) = registry.get_tool(&call.name) else {
            tracing::debug!(tool = %call.name, id = %call.id, "tool not found");
            return ToolExecutionResult::Failure(not_found_message(&call.name));
        };

        tracing::debug!(tool = %call.name, id = %call.id, plugin = %entry.plugin_id, "executing tool");
        let future = AssertUnwindSafe(entry.plugin.execute(&call.name, &call.arguments));
        match future.catch_unwind().await {
            Ok(result) => {
                let result = ToolExecutionResult::from(result);
                if !result.is_success() {
                    tracing::debug!(tool = %call.name, id = %call.id, "tool returned a failure");
                }
                result
            }
            Err(_) => {
                tracing::warn!(tool = %call.name, id = %call.id, "tool panicked during execution");
                ToolExecutionResult::Failure(format!(
                    "Tool '{}' crashed during execution",
                    call.name
                ))
            }
        }
    }
}

pub(crate) fn not_found_message(name: &str) -> String {
    ToolError::ToolNotFound(format!(
        "'{}' is not an available tool. Only call tools listed in this request, using their exact names.",
        name
    ))
    .to_string()
}
