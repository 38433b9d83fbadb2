use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::base::Usage;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::content::MediaAttachment;
use crate::models::message::{Message, Role};
use crate::models::tool::ToolCall;

pub const MISSING_TOOL_RESULT: &str = "No result was recorded for this tool call.";

const CONTEXT_OVERFLOW_PHRASES: &[&str] = &[
    "context length exceeded",
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "too many tokens",
    "prompt is too long",
    "input is too long",
    "payload size exceeds",
    "exceeds the maximum number of tokens",
    "string_above_max_length",
    "request_too_large",
];

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub enum ImageFormat {
    OpenAi,
    Anthropic,
}

/// Convert a media attachment into an image json based on format
pub fn convert_image(media: &MediaAttachment, image_format: &ImageFormat) -> Value {
    match image_format {
        ImageFormat::OpenAi => json!({
            "type": "image_url",
            "image_url": {
                "url": media.data_url()
            }
        }),
        ImageFormat::Anthropic => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media.mime_type,
                "data": media.data,
            }
        }),
    }
}

/// One tool result paired with the call it answers
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply<'a> {
    pub call: &'a ToolCall,
    pub content: &'a str,
}

/// A unit of conversation as providers need to see it
#[derive(Debug, Clone, PartialEq)]
pub enum Exchange<'a> {
    /// A user, assistant (without tool calls) or system message
    Plain(&'a Message),
    /// An assistant message with tool calls and one reply per call, in call order
    ToolRound {
        call: &'a Message,
        replies: Vec<ToolReply<'a>>,
    },
    /// A tool message with no matching call before it
    Orphan(&'a Message),
}

/// Scan `messages` forward, pairing every assistant message that has tool calls
/// with the contiguous run of tool messages that follows it.
///
/// Calls without a recorded result get a placeholder reply so the rebuilt
/// request stays well formed; tool messages that answer none of the calls are
/// reported as orphans right after the round.
pub fn group_exchanges(messages: &[Message]) -> Vec<Exchange<'_>> {
    let mut exchanges = Vec::new();
    let mut index = 0;

    while index < messages.len() {
        let message = &messages[index];
        index += 1;

        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let mut results: Vec<&Message> = Vec::new();
                while index < messages.len() && messages[index].role == Role::Tool {
                    results.push(&messages[index]);
                    index += 1;
                }

                let ids: HashSet<&str> =
                    message.tool_calls().iter().map(|call| call.id.as_str()).collect();
                let replies = message
                    .tool_calls()
                    .iter()
                    .map(|call| {
                        let content = results
                            .iter()
                            .find(|result| result.tool_call_id.as_deref() == Some(call.id.as_str()))
                            .map(|result| result.content.as_deref().unwrap_or_default())
                            .unwrap_or(MISSING_TOOL_RESULT);
                        ToolReply { call, content }
                    })
                    .collect();
                exchanges.push(Exchange::ToolRound {
                    call: message,
                    replies,
                });

                for result in results {
                    let answered = result
                        .tool_call_id
                        .as_deref()
                        .map(|id| ids.contains(id))
                        .unwrap_or(false);
                    if !answered {
                        tracing::warn!(tool_call_id = ?result.tool_call_id, "tool result does not match any call");
                        exchanges.push(Exchange::Orphan(result));
                    }
                }
            }
            Role::Tool => {
                tracing::warn!(tool_call_id = ?message.tool_call_id, "orphaned tool result");
                exchanges.push(Exchange::Orphan(message));
            }
            _ => exchanges.push(Exchange::Plain(message)),
        }
    }

    exchanges
}

/// Plain-text rendering of an orphaned tool result
pub fn orphan_text(message: &Message) -> String {
    format!(
        "[result of tool call {}]: {}",
        message.tool_call_id.as_deref().unwrap_or("unknown"),
        message.content.as_deref().unwrap_or_default()
    )
}

/// Concatenated text of all system messages, and everything else
pub fn split_system(messages: &[Message]) -> (Option<String>, &[Message]) {
    let system_count = messages
        .iter()
        .take_while(|message| message.role == Role::System)
        .count();
    let system: Vec<&str> = messages[..system_count]
        .iter()
        .filter_map(|message| message.text())
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, &messages[system_count..])
}

static INVALID_NAME_CHARS: OnceLock<Regex> = OnceLock::new();
static VALID_NAME: OnceLock<Regex> = OnceLock::new();

pub fn sanitize_function_name(name: &str) -> String {
    let re = INVALID_NAME_CHARS.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex"));
    re.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    let re = VALID_NAME.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));
    re.is_match(name)
}

/// Best-effort detection of a context overflow from provider error text.
///
/// Matching human readable messages is brittle, so a provider rewording its
/// error means the overflow is reported as an ordinary failure instead.
pub fn is_context_overflow_message(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CONTEXT_OVERFLOW_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Pull a readable message out of a provider error body
pub fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        let error = value.get("error").unwrap_or(&value);
        match error {
            Value::String(text) => Some(text.clone()),
            _ => error
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from),
        }
    });

    match message {
        Some(message) => message,
        None if body.trim().is_empty() => "no response body".to_string(),
        None => body.chars().take(500).collect(),
    }
}

/// Map a non-success HTTP response to the provider error taxonomy
pub fn classify_http_error(status: StatusCode, body: &str) -> ProviderError {
    let message = error_message(body);
    let code = status.as_u16();

    if is_context_overflow_message(body) || status == StatusCode::PAYLOAD_TOO_LARGE {
        return ProviderError::ContextLengthExceeded(message);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth {
            status: code,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        status if status.is_server_error() => ProviderError::Server {
            status: code,
            message,
        },
        _ => ProviderError::RequestFailed {
            status: code,
            message,
        },
    }
}

/// Classify an `error` object embedded in a successful response body
pub fn check_error_body(response: &Value) -> Option<ProviderError> {
    let error = response.get("error").filter(|error| !error.is_null())?;
    let text = error.to_string();
    let message = error_message(&response.to_string());

    if is_context_overflow_message(&text) {
        return Some(ProviderError::ContextLengthExceeded(message));
    }
    let status = error
        .get("code")
        .and_then(|code| code.as_u64())
        .and_then(|code| StatusCode::from_u16(code as u16).ok());
    Some(match status {
        Some(status) if !status.is_success() => classify_http_error(status, &response.to_string()),
        _ => ProviderError::RequestFailed {
            status: 200,
            message,
        },
    })
}

/// Send a request and decode the JSON body, classifying any failure
pub async fn send_json(request: RequestBuilder) -> ProviderResult<Value> {
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse("empty response body".into()));
        }
        Ok(serde_json::from_str(&text)?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(classify_http_error(status, &body))
    }
}

/// Parse the `usage` object shared by the OpenAI style APIs
pub fn parse_usage(usage: Option<&Value>, input_key: &str, output_key: &str) -> Usage {
    let field = |key: &str| {
        usage
            .and_then(|usage| usage.get(key))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
    };
    Usage::new(field(input_key), field(output_key), field("total_tokens"))
}
