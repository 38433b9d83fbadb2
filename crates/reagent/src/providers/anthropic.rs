use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{CompletionOptions, LlmResponse, Provider};
use super::configs::{AnthropicProviderConfig, LiveCredentials};
use super::utils::{
    check_error_body, convert_image, group_exchanges, orphan_text, parse_usage,
    sanitize_function_name, send_json, split_system, Exchange, ImageFormat,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::executor::TOOL_ERROR_PREFIX;
use crate::models::content::ProviderMeta;
use crate::models::message::{Message, Role};
use crate::models::tool::{ToolCall, ToolDefinition};

const PROVIDER_NAME: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    credentials: LiveCredentials,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            credentials: LiveCredentials::new(config.host, config.api_key),
        })
    }
}

fn text_blocks(message: &Message) -> Vec<Value> {
    let mut blocks = Vec::new();
    if let Some(text) = message.text() {
        blocks.push(json!({"type": "text", "text": text}));
    }
    for media in &message.media {
        blocks.push(convert_image(media, &ImageFormat::Anthropic));
    }
    blocks
}

/// Assistant content blocks for a turn that called tools.
///
/// The blocks the API originally returned are replayed when we have them, since
/// thinking blocks must come back with their signatures intact.
fn tool_use_blocks(message: &Message) -> Vec<Value> {
    let preserved = message
        .provider_meta
        .as_ref()
        .and_then(|meta| meta.payload_for(PROVIDER_NAME))
        .and_then(|payload| payload.get("content"))
        .and_then(|content| content.as_array());
    if let Some(blocks) = preserved {
        return blocks.clone();
    }

    let mut blocks = text_blocks(message);
    for tool_call in message.tool_calls() {
        blocks.push(json!({
            "type": "tool_use",
            "id": tool_call.id,
            "name": sanitize_function_name(&tool_call.name),
            "input": tool_call.arguments_value(),
        }));
    }
    blocks
}

/// Convert internal messages to the Anthropic `messages` array
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut anthropic_messages = Vec::new();

    for exchange in group_exchanges(messages) {
        match exchange {
            Exchange::Plain(message) => {
                let role = match message.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                let blocks = if message.role == Role::Assistant {
                    tool_use_blocks(message)
                } else {
                    text_blocks(message)
                };
                if blocks.is_empty() {
                    continue;
                }
                anthropic_messages.push(json!({"role": role, "content": blocks}));
            }
            Exchange::ToolRound { call, replies } => {
                anthropic_messages.push(json!({
                    "role": "assistant",
                    "content": tool_use_blocks(call),
                }));

                let results: Vec<Value> = replies
                    .iter()
                    .map(|reply| {
                        let mut result = json!({
                            "type": "tool_result",
                            "tool_use_id": reply.call.id,
                            "content": reply.content,
                        });
                        if reply.content.starts_with(TOOL_ERROR_PREFIX) {
                            result["is_error"] = json!(true);
                        }
                        result
                    })
                    .collect();
                anthropic_messages.push(json!({"role": "user", "content": results}));
            }
            Exchange::Orphan(message) => {
                anthropic_messages.push(json!({
                    "role": "user",
                    "content": [{"type": "text", "text": orphan_text(message)}],
                }));
            }
        }
    }

    anthropic_messages
}

pub fn tools_to_anthropic_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect()
}

/// Convert an Anthropic messages response into the provider-agnostic response
pub fn anthropic_response_to_llm_response(response: &Value) -> ProviderResult<LlmResponse> {
    let blocks = response
        .get("content")
        .and_then(|content| content.as_array())
        .ok_or_else(|| ProviderError::MalformedResponse("missing content array".into()))?;

    if blocks.is_empty() && response.get("stop_reason").map_or(true, Value::is_null) {
        return Err(ProviderError::EmptyResponse("empty content in response".into()));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut has_thinking = false;

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                text.push_str(block.get("text").and_then(|t| t.as_str()).unwrap_or_default())
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            Some("thinking") | Some("redacted_thinking") => has_thinking = true,
            _ => {}
        }
    }

    let provider_meta =
        has_thinking.then(|| ProviderMeta::new(PROVIDER_NAME, json!({ "content": blocks })));
    let usage = parse_usage(response.get("usage"), "input_tokens", "output_tokens");

    Ok(LlmResponse::new(Some(text), tool_calls, usage, provider_meta))
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> ProviderResult<LlmResponse> {
        let (host, api_key) = self.credentials.snapshot();
        let (system, conversation) = split_system(messages);

        let mut payload = json!({
            "model": options.model,
            "messages": messages_to_anthropic_spec(conversation),
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }

        let mut tools_spec = tools_to_anthropic_spec(tools);
        if options.enable_web_search {
            tools_spec.push(json!({"type": "web_search_20250305", "name": "web_search"}));
        }
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if let Some(temp) = options.temperature {
            payload["temperature"] = json!(temp);
        }

        tracing::debug!(
            model = %options.model,
            messages = conversation.len(),
            tools = tools.len(),
            "anthropic messages request"
        );

        let request = self
            .client
            .post(format!("{}/v1/messages", host))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);
        let response = send_json(request).await?;

        if let Some(err) = check_error_body(&response) {
            return Err(err);
        }

        let response = anthropic_response_to_llm_response(&response)?;
        tracing::debug!(finish_reason = ?response.finish_reason, usage = ?response.usage, "anthropic response");
        Ok(response)
    }

    fn set_api_key(&self, api_key: &str) {
        self.credentials.set_api_key(api_key);
    }

    fn set_base_url(&self, base_url: &str) {
        self.credentials.set_host(base_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::MediaAttachment;
    use crate::providers::base::FinishReason;
    use crate::providers::configs::DEFAULT_TIMEOUT;
    use anyhow::Result;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, AnthropicProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let config = AnthropicProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            timeout: DEFAULT_TIMEOUT,
        };

        let provider = AnthropicProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [{
                "type": "text",
                "text": "Hello! How can I assist you today?"
            }],
            "model": "claude-3-5-sonnet-latest",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {
                "input_tokens": 12,
                "output_tokens": 15
            }
        });

        let (_server, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;
        let messages = vec![
            Message::system().with_text("You are a helpful assistant."),
            Message::user().with_text("Hello?"),
        ];

        let response = provider
            .complete(&messages, &[], &CompletionOptions::new("claude-3-5-sonnet-latest"))
            .await?;

        assert_eq!(response.text(), Some("Hello! How can I assist you today?"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.input_tokens, Some(12));
        assert_eq!(response.usage.output_tokens, Some(15));
        assert_eq!(response.usage.total_tokens, Some(27));
        Ok(())
    }

    #[tokio::test]
    async fn test_request_shape() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "model": "claude-3-5-sonnet-latest",
                "system": "sys",
                "max_tokens": 4096,
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": "weather?"}]},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Lima"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "toolu_1", "content": "humid"}
                    ]}
                ],
                "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Humid in Lima."}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 5, "output_tokens": 4}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(AnthropicProviderConfig {
            host: mock_server.uri(),
            api_key: "k".into(),
            timeout: DEFAULT_TIMEOUT,
        })?;
        let messages = vec![
            Message::system().with_text("sys"),
            Message::user().with_text("weather?"),
            Message::assistant().with_tool_call(ToolCall::new(
                "toolu_1",
                "get_weather",
                r#"{"city":"Lima"}"#,
            )),
            Message::tool("toolu_1", "get_weather", "humid"),
        ];
        let tools = vec![ToolDefinition::new(
            "get_weather",
            "weather",
            json!({"type": "object"}),
        )];
        let response = provider
            .complete(&messages, &tools, &CompletionOptions::new("claude-3-5-sonnet-latest"))
            .await?;
        assert_eq!(response.text(), Some("Humid in Lima."));
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_use_with_thinking_is_preserved() -> Result<()> {
        let content = json!([
            {"type": "thinking", "thinking": "Need the weather tool.", "signature": "sig-abc"},
            {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "Quito"}}
        ]);
        let (_server, provider) = setup_mock_server(ResponseTemplate::new(200).set_body_json(json!({
            "content": content,
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 10}
        })))
        .await;

        let response = provider
            .complete(
                &[Message::user().with_text("weather in Quito")],
                &[],
                &CompletionOptions::new("claude-sonnet-4-0"),
            )
            .await?;

        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.tool_calls.clone().unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].arguments_value(), json!({"city": "Quito"}));

        // Replaying the turn sends the original blocks, signature included
        let history = vec![
            Message::user().with_text("weather in Quito"),
            response.to_message(),
            Message::tool("toolu_9", "get_weather", "mild"),
        ];
        let spec = messages_to_anthropic_spec(&history);
        assert_eq!(spec[1]["content"], content);
        assert_eq!(spec[2]["content"][0]["tool_use_id"], "toolu_9");
        Ok(())
    }

    #[tokio::test]
    async fn test_prompt_too_long_is_context_overflow() {
        let (_server, provider) = setup_mock_server(ResponseTemplate::new(400).set_body_json(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "prompt is too long: 201234 tokens > 200000 maximum"}
        })))
        .await;

        let err = provider
            .complete(
                &[Message::user().with_text("hi")],
                &[],
                &CompletionOptions::new("claude-sonnet-4-0"),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::ContextLengthExceeded(
                "prompt is too long: 201234 tokens > 200000 maximum".into()
            )
        );
    }

    #[tokio::test]
    async fn test_auth_error() {
        let (_server, provider) = setup_mock_server(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .await;

        let err = provider
            .complete(
                &[Message::user().with_text("hi")],
                &[],
                &CompletionOptions::new("claude-sonnet-4-0"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth { status: 401, .. }));
    }

    #[test]
    fn test_image_and_orphan_translation() {
        let messages = vec![
            Message::user()
                .with_text("describe")
                .with_media(MediaAttachment::new("abc", "image/jpeg")),
            Message::tool("ghost", "search", "late result"),
        ];
        let spec = messages_to_anthropic_spec(&messages);
        assert_eq!(spec[0]["content"][1]["source"]["media_type"], "image/jpeg");
        assert_eq!(
            spec[1],
            json!({"role": "user", "content": [{"type": "text", "text": "[result of tool call ghost]: late result"}]})
        );
    }

    #[test]
    fn test_failed_tool_result_is_flagged() {
        let history = vec![
            Message::user().with_text("send it"),
            Message::assistant()
                .with_tool_call(ToolCall::new("toolu_1", "send_email", "{}"))
                .with_tool_call(ToolCall::new("toolu_2", "get_weather", "{}")),
            Message::tool("toolu_1", "send_email", format!("{}\nsmtp down", TOOL_ERROR_PREFIX)),
            Message::tool("toolu_2", "get_weather", "sunny"),
        ];

        let spec = messages_to_anthropic_spec(&history);
        let results = &spec[2]["content"];
        assert_eq!(results[0]["is_error"], json!(true));
        assert!(results[1].get("is_error").is_none());
    }

    #[test]
    fn test_empty_content() {
        let err = anthropic_response_to_llm_response(&json!({"content": []})).unwrap_err();
        assert_eq!(err, ProviderError::EmptyResponse("empty content in response".into()));

        // An explicit end of turn with no content is a valid, if empty, answer
        let response =
            anthropic_response_to_llm_response(&json!({"content": [], "stop_reason": "end_turn"}))
                .unwrap();
        assert_eq!(response.text(), None);
    }
}
