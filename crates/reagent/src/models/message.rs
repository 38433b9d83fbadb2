use super::content::{MediaAttachment, ProviderMeta};
use super::tool::ToolCall;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const SUMMARY_PREFIX: &str = "[Conversation summary]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Only set on assistant messages that invoke tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Only set on tool messages; links the result to its invoking call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Only set on tool messages; the name of the tool that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<ProviderMeta>,
    /// Marks the synthetic message that stands in for summarized history
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
            media: Vec::new(),
            provider_meta: None,
            summary: false,
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Self::with_role(Role::System)
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::with_role(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::with_role(Role::Assistant)
    }

    /// Create a tool result message answering the call `tool_call_id`
    pub fn tool<I: Into<String>, N: Into<String>, C: Into<String>>(
        tool_call_id: I,
        name: N,
        content: C,
    ) -> Self {
        let mut message = Self::with_role(Role::Tool);
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        message.content = Some(content.into());
        message
    }

    /// Create the synthetic message that replaces summarized history
    pub fn summary<S: AsRef<str>>(text: S) -> Self {
        let mut message = Self::with_role(Role::User);
        message.content = Some(format!("{}\n{}", SUMMARY_PREFIX, text.as_ref()));
        message.summary = true;
        message
    }

    /// Set the text content of the message
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content = Some(text.into());
        self
    }

    /// Add media content to the message
    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media.push(media);
        self
    }

    /// Add a tool call to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.get_or_insert_with(Vec::new).push(tool_call);
        self
    }

    pub fn with_provider_meta(mut self, meta: ProviderMeta) -> Self {
        self.provider_meta = Some(meta);
        self
    }

    /// Text content, treating an empty string the same as no content
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|text| !text.is_empty())
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    /// The summary text without its marker, if this is a summary message
    pub fn summary_text(&self) -> Option<&str> {
        if !self.summary {
            return None;
        }
        self.content
            .as_deref()
            .map(|text| text.trim_start_matches(SUMMARY_PREFIX).trim_start())
    }
}
