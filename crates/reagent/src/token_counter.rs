use crate::models::message::Message;
use crate::models::tool::ToolDefinition;

/// Context window used for models missing from the table below
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

const CHARS_PER_TOKEN: usize = 4;
const MESSAGE_OVERHEAD: usize = 4;
const MEDIA_TOKENS: usize = 1_000;

// Checked in order, so longer prefixes come before shorter ones
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4.1", 1_047_576),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-5", 400_000),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4", 200_000),
    ("claude", 200_000),
    ("gemini-1.5-pro", 2_097_152),
    ("gemini", 1_048_576),
];

/// Cheap prompt size estimate: characters divided by four plus a small
/// per-message overhead. Good enough to decide when to summarize, not for
/// billing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut tokens = MESSAGE_OVERHEAD;
        if let Some(content) = &message.content {
            tokens += self.count_tokens(content);
        }
        for tool_call in message.tool_calls() {
            tokens += self.count_tokens(&tool_call.name) + self.count_tokens(&tool_call.arguments);
        }
        tokens + message.media.len() * MEDIA_TOKENS
    }

    pub fn estimate_messages(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> usize {
        let system_tokens = system.map_or(0, |text| MESSAGE_OVERHEAD + self.count_tokens(text));
        let message_tokens: usize = messages.iter().map(|m| self.estimate_message(m)).sum();
        let tool_tokens: usize = tools
            .iter()
            .map(|tool| {
                self.count_tokens(&tool.name)
                    + self.count_tokens(&tool.description)
                    + self.count_tokens(&tool.parameters.to_string())
            })
            .sum();
        system_tokens + message_tokens + tool_tokens
    }
}

/// Known context window for `model`, falling back to a conservative default
pub fn context_window(model: &str) -> usize {
    let model = model.to_lowercase();
    // Strip any "models/" or vendor prefix
    let name = model.rsplit('/').next().unwrap_or(&model);
    CONTEXT_WINDOWS
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}
