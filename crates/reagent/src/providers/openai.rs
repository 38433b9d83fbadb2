use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{CompletionOptions, LlmResponse, Provider};
use super::configs::{LiveCredentials, OpenAiProviderConfig};
use super::utils::{
    check_error_body, convert_image, group_exchanges, orphan_text, parse_usage,
    sanitize_function_name, send_json, Exchange, ImageFormat,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::{Message, Role};
use crate::models::tool::{ToolCall, ToolDefinition};

pub struct OpenAiProvider {
    client: Client,
    credentials: LiveCredentials,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            credentials: LiveCredentials::new(config.host, config.api_key),
        })
    }
}

/// Convert a plain message to a chat completions message
fn plain_to_openai_spec(message: &Message, image_format: &ImageFormat) -> Value {
    let mut converted = json!({ "role": message.role.as_str() });

    if message.media.is_empty() {
        converted["content"] = json!(message.content.as_deref().unwrap_or_default());
    } else {
        let mut parts = Vec::new();
        if let Some(text) = message.text() {
            parts.push(json!({"type": "text", "text": text}));
        }
        for media in &message.media {
            parts.push(convert_image(media, image_format));
        }
        converted["content"] = json!(parts);
    }

    converted
}

/// Convert internal Message format to OpenAI's chat completions message specification
///   some openai compatible endpoints use the anthropic image spec at the content level
///   even though the message structure is otherwise following openai, the enum switches this
pub fn messages_to_openai_spec(messages: &[Message], image_format: &ImageFormat) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for exchange in group_exchanges(messages) {
        match exchange {
            Exchange::Plain(message) => {
                messages_spec.push(plain_to_openai_spec(message, image_format));
            }
            Exchange::ToolRound { call, replies } => {
                let tool_calls: Vec<Value> = call
                    .tool_calls()
                    .iter()
                    .map(|tool_call| {
                        json!({
                            "id": tool_call.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments,
                            }
                        })
                    })
                    .collect();

                messages_spec.push(json!({
                    "role": "assistant",
                    "content": call.text(),
                    "tool_calls": tool_calls,
                }));

                for reply in replies {
                    messages_spec.push(json!({
                        "role": "tool",
                        "content": reply.content,
                        "tool_call_id": reply.call.id,
                    }));
                }
            }
            Exchange::Orphan(message) => {
                messages_spec.push(json!({
                    "role": "user",
                    "content": orphan_text(message),
                }));
            }
        }
    }

    messages_spec
}

/// Convert internal tool definitions to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[ToolDefinition]) -> ProviderResult<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's chat completions response to the provider-agnostic response
pub fn openai_response_to_llm_response(response: &Value) -> ProviderResult<LlmResponse> {
    let choice = response
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .ok_or_else(|| ProviderError::EmptyResponse("no choices in response".into()))?;

    let original = choice
        .get("message")
        .ok_or_else(|| ProviderError::MalformedResponse("choice has no message".into()))?;

    let content = original
        .get("content")
        .and_then(|text| text.as_str())
        .map(String::from);

    let mut tool_calls = Vec::new();
    if let Some(tool_calls_array) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls_array {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            tool_calls.push(ToolCall::new(id, function_name, arguments));
        }
    }

    let usage = parse_usage(response.get("usage"), "prompt_tokens", "completion_tokens");
    Ok(LlmResponse::new(content, tool_calls, usage, None))
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> ProviderResult<LlmResponse> {
        let (host, api_key) = self.credentials.snapshot();

        let mut payload = json!({
            "model": options.model,
            "messages": messages_to_openai_spec(messages, &ImageFormat::OpenAi),
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        if let Some(temp) = options.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = options.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }
        if options.enable_web_search {
            payload["web_search_options"] = json!({});
        }

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            system = messages.first().map(|m| m.role == Role::System).unwrap_or(false),
            "openai chat completion request"
        );

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", host))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&payload);
        let response = send_json(request).await?;

        // Raise specific error if the body carries one, e.g. context length exceeded
        if let Some(err) = check_error_body(&response) {
            return Err(err);
        }

        let response = openai_response_to_llm_response(&response)?;
        tracing::debug!(finish_reason = ?response.finish_reason, usage = ?response.usage, "openai response");
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

    fn provider_for(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiProviderConfig {
            host: server.uri(),
            api_key: "test_api_key".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
        .unwrap()
    }

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        (mock_server, provider)
    }

    fn weather_tool() -> ToolDefinition {
        ToolDefinition::new(
            "get_weather",
            "Gets the current weather for a location",
            json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g. New York, NY"
                    }
                },
                "required": ["location"]
            }),
        )
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_server, provider) = setup_mock_server(response_body).await;
        let messages = vec![
            Message::system().with_text("You are a helpful assistant."),
            Message::user().with_text("Hello?"),
        ];

        let response = provider
            .complete(&messages, &[], &CompletionOptions::new("gpt-4o"))
            .await?;

        assert_eq!(response.text(), Some("Hello! How can I assist you today?"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.input_tokens, Some(12));
        assert_eq!(response.usage.output_tokens, Some(15));
        assert_eq!(response.usage.total_tokens, Some(27));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"location\":\"San Francisco, CA\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 15,
                "total_tokens": 35
            }
        });

        let (_server, provider) = setup_mock_server(response_body).await;
        let messages = vec![Message::user().with_text("What's the weather in San Francisco?")];

        let response = provider
            .complete(&messages, &[weather_tool()], &CompletionOptions::new("gpt-4o"))
            .await?;

        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_123");
        assert_eq!(calls[0].name, "get_weather");
        // Arguments are passed through as the raw text the model produced
        assert_eq!(calls[0].arguments, "{\"location\":\"San Francisco, CA\"}");
        Ok(())
    }

    #[tokio::test]
    async fn test_request_body_round_trips_tool_exchange() -> Result<()> {
        let mock_server = MockServer::start().await;
        let expected = json!({
            "model": "gpt-4o",
            "temperature": 0.5,
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}
                }]},
                {"role": "tool", "content": "sunny", "tool_call_id": "call_1"}
            ]
        });
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "It is sunny."}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let messages = vec![
            Message::system().with_text("sys"),
            Message::user().with_text("weather?"),
            Message::assistant().with_tool_call(ToolCall::new(
                "call_1",
                "get_weather",
                "{\"location\":\"Paris\"}",
            )),
            Message::tool("call_1", "get_weather", "sunny"),
        ];
        let response = provider_for(&mock_server)
            .complete(
                &messages,
                &[weather_tool()],
                &CompletionOptions::new("gpt-4o").with_temperature(0.5),
            )
            .await?;
        assert_eq!(response.text(), Some("It is sunny."));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let (_server, provider) = setup_mock_server(json!({"choices": []})).await;
        let err = provider
            .complete(
                &[Message::user().with_text("hi")],
                &[],
                &CompletionOptions::new("gpt-4o"),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::EmptyResponse("no choices in response".into())
        );
    }

    #[tokio::test]
    async fn test_context_length_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "This model's maximum context length is 8192 tokens.",
                    "type": "invalid_request_error",
                    "code": "context_length_exceeded"
                }
            })))
            .mount(&mock_server)
            .await;

        let err = provider_for(&mock_server)
            .complete(
                &[Message::user().with_text("hi")],
                &[],
                &CompletionOptions::new("gpt-4o"),
            )
            .await
            .unwrap_err();
        assert!(err.is_context_overflow());
    }

    #[tokio::test]
    async fn test_set_api_key_applies_to_next_call() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer rotated"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        provider.set_api_key("rotated");
        provider
            .complete(
                &[Message::user().with_text("hi")],
                &[],
                &CompletionOptions::new("gpt-4o"),
            )
            .await?;
        Ok(())
    }

    #[test]
    fn test_messages_to_openai_spec_with_media_and_orphan() {
        let messages = vec![
            Message::tool("lost", "search", "stale result"),
            Message::user()
                .with_text("what is this?")
                .with_media(MediaAttachment::new("abc", "image/png")),
        ];
        let spec = messages_to_openai_spec(&messages, &ImageFormat::OpenAi);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "[result of tool call lost]: stale result");
        assert_eq!(spec[1]["content"][0], json!({"type": "text", "text": "what is this?"}));
        assert_eq!(
            spec[1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,abc"
        );
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tools = vec![weather_tool(), weather_tool()];
        assert!(tools_to_openai_spec(&tools).is_err());

        let spec = tools_to_openai_spec(&[weather_tool()]).unwrap();
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "get_weather");
    }

    #[test]
    fn test_messages_to_openai_spec() {
        let spec =
            messages_to_openai_spec(&[Message::user().with_text("Hello")], &ImageFormat::OpenAi);
        assert_eq!(spec, vec![json!({"role": "user", "content": "Hello"})]);
    }
}
