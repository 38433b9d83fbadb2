use async_trait::async_trait;

use crate::errors::ToolResult;

/// Core trait that defines a plugin whose tools can be called by the agent.
///
/// Loading and unloading are handled by whoever owns the plugin; the agent only
/// ever asks it to run one of the tools it registered.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Execute `tool_name` with the raw JSON `arguments` the model produced.
    ///
    /// Arguments are forwarded unmodified, so validating them is the plugin's job.
    /// Any timeout the tool needs must be enforced here as well.
    async fn execute(&self, tool_name: &str, arguments: &str) -> ToolResult<String>;
}
