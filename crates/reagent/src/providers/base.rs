use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderResult;
use crate::models::content::ProviderMeta;
use crate::models::message::Message;
use crate::models::tool::{ToolCall, ToolDefinition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        let total_tokens = total_tokens.or(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Add another call's usage onto this running total
    pub fn accumulate(&mut self, other: &Usage) {
        fn add(total: &mut Option<i32>, value: Option<i32>) {
            if let Some(value) = value {
                *total = Some(total.unwrap_or(0) + value);
            }
        }
        add(&mut self.input_tokens, other.input_tokens);
        add(&mut self.output_tokens, other.output_tokens);
        add(&mut self.total_tokens, other.total_tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

/// Per-call request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub enable_web_search: bool,
}

impl CompletionOptions {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            enable_web_search: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.enable_web_search = enabled;
        self
    }
}

/// Provider-agnostic result of one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub provider_meta: Option<ProviderMeta>,
}

impl LlmResponse {
    /// Build a response, deriving the finish reason from whether any tool calls came back
    pub fn new(
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
        provider_meta: Option<ProviderMeta>,
    ) -> Self {
        let (tool_calls, finish_reason) = if tool_calls.is_empty() {
            (None, FinishReason::Stop)
        } else {
            (Some(tool_calls), FinishReason::ToolCalls)
        };
        Self {
            content: content.filter(|text| !text.is_empty()),
            tool_calls,
            finish_reason,
            usage,
            provider_meta,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|text| !text.trim().is_empty())
    }

    /// The assistant message to store in history
    pub fn to_message(&self) -> Message {
        Message {
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            provider_meta: self.provider_meta.clone(),
            ..Message::assistant()
        }
    }
}

/// Base trait for LLM backends (OpenAI, Anthropic, Gemini, etc).
///
/// Implementations rebuild the full wire payload from `messages` on every call
/// and keep no per-conversation state, so one instance may serve many
/// conversations at once. System-role messages in `messages` are mapped to
/// whatever the provider uses for its system prompt.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short tag used to mark provider metadata this client produced
    fn name(&self) -> &'static str;

    /// Generate the next assistant turn
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> ProviderResult<LlmResponse>;

    /// Replace the API key used by subsequent calls
    fn set_api_key(&self, api_key: &str);

    /// Replace the base URL used by subsequent calls
    fn set_base_url(&self, base_url: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));

        let derived = Usage::new(Some(10), Some(20), None);
        assert_eq!(derived.total_tokens, Some(30));
    }

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let serialized = serde_json::to_string(&usage)?;
        let json_value: serde_json::Value = serde_json::from_str(&serialized)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        assert_eq!(json_value["total_tokens"], json!(30));
        Ok(())
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = Usage::default();
        total.accumulate(&Usage::new(Some(10), Some(5), None));
        total.accumulate(&Usage::new(Some(7), None, None));
        assert_eq!(total.input_tokens, Some(17));
        assert_eq!(total.output_tokens, Some(5));
        assert_eq!(total.total_tokens, Some(15));
    }

    #[test]
    fn test_finish_reason_follows_tool_calls() {
        let stop = LlmResponse::new(Some("done".into()), vec![], Usage::default(), None);
        assert_eq!(stop.finish_reason, FinishReason::Stop);
        assert!(stop.tool_calls.is_none());

        let calls = LlmResponse::new(
            None,
            vec![ToolCall::new("1", "echo", "{}")],
            Usage::default(),
            None,
        );
        assert_eq!(calls.finish_reason, FinishReason::ToolCalls);
        assert_eq!(serde_json::to_value(calls.finish_reason).unwrap(), json!("tool_calls"));
    }

    #[test]
    fn test_to_message_carries_meta() {
        let meta = ProviderMeta::new("anthropic", json!({"content": []}));
        let response = LlmResponse::new(
            Some("hi".into()),
            vec![ToolCall::new("1", "echo", "{}")],
            Usage::default(),
            Some(meta.clone()),
        );
        let message = response.to_message();
        assert_eq!(message.text(), Some("hi"));
        assert_eq!(message.tool_calls().len(), 1);
        assert_eq!(message.provider_meta, Some(meta));
    }
}
