use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{CompletionOptions, LlmResponse, Provider};
use super::configs::{LiveCredentials, OpenAiProviderConfig};
use super::utils::{
    check_error_body, group_exchanges, orphan_text, parse_usage, sanitize_function_name,
    send_json, split_system, Exchange,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::content::ProviderMeta;
use crate::models::message::{Message, Role};
use crate::models::tool::{ToolCall, ToolDefinition};

const PROVIDER_NAME: &str = "openai_responses";

/// Client for the OpenAI Responses API (`/v1/responses`)
pub struct OpenAiResponsesProvider {
    client: Client,
    credentials: LiveCredentials,
}

impl OpenAiResponsesProvider {
    pub fn new(config: OpenAiProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            credentials: LiveCredentials::new(config.host, config.api_key),
        })
    }
}

fn message_item(message: &Message) -> Value {
    let text_type = match message.role {
        Role::Assistant => "output_text",
        _ => "input_text",
    };

    let mut parts = Vec::new();
    if let Some(text) = message.text() {
        parts.push(json!({"type": text_type, "text": text}));
    }
    for media in &message.media {
        parts.push(json!({"type": "input_image", "image_url": media.data_url()}));
    }

    json!({
        "type": "message",
        "role": message.role.as_str(),
        "content": parts,
    })
}

/// Output items of the assistant turn that produced `message`, if we have them
fn preserved_items(message: &Message) -> Option<&Vec<Value>> {
    message
        .provider_meta
        .as_ref()?
        .payload_for(PROVIDER_NAME)?
        .get("output")?
        .as_array()
}

/// Convert internal messages to Responses API `input` items
pub fn messages_to_responses_input(messages: &[Message]) -> Vec<Value> {
    let mut items = Vec::new();

    for exchange in group_exchanges(messages) {
        match exchange {
            Exchange::Plain(message) => match preserved_items(message) {
                Some(output) if message.role == Role::Assistant => {
                    items.extend(output.iter().cloned())
                }
                _ => items.push(message_item(message)),
            },
            Exchange::ToolRound { call, replies } => {
                match preserved_items(call) {
                    Some(output) => items.extend(output.iter().cloned()),
                    None => {
                        if call.text().is_some() {
                            items.push(message_item(call));
                        }
                        for tool_call in call.tool_calls() {
                            items.push(json!({
                                "type": "function_call",
                                "call_id": tool_call.id,
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments,
                            }));
                        }
                    }
                }
                for reply in replies {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": reply.call.id,
                        "output": reply.content,
                    }));
                }
            }
            Exchange::Orphan(message) => {
                items.push(json!({
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": orphan_text(message)}],
                }));
            }
        }
    }

    items
}

pub fn tools_to_responses_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect()
}

/// Convert a Responses API body into the provider-agnostic response
pub fn responses_to_llm_response(response: &Value) -> ProviderResult<LlmResponse> {
    if response.get("status").and_then(|s| s.as_str()) == Some("failed") {
        return Err(check_error_body(response).unwrap_or_else(|| {
            ProviderError::MalformedResponse("response failed without an error".into())
        }));
    }

    let output = response
        .get("output")
        .and_then(|output| output.as_array())
        .filter(|output| !output.is_empty())
        .ok_or_else(|| ProviderError::EmptyResponse("no output items in response".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut has_reasoning = false;

    for item in output {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                let parts = item.get("content").and_then(|c| c.as_array());
                for part in parts.into_iter().flatten() {
                    if part.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                        text.push_str(part.get("text").and_then(|t| t.as_str()).unwrap_or_default());
                    }
                }
            }
            Some("function_call") => {
                let id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let arguments = item
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                tool_calls.push(ToolCall::new(id, name, arguments));
            }
            Some("reasoning") => has_reasoning = true,
            _ => {}
        }
    }

    // Reasoning items have to be sent back alongside the calls they led to
    let provider_meta = has_reasoning
        .then(|| ProviderMeta::new(PROVIDER_NAME, json!({ "output": output })));

    let usage = parse_usage(response.get("usage"), "input_tokens", "output_tokens");
    Ok(LlmResponse::new(
        Some(text),
        tool_calls,
        usage,
        provider_meta,
    ))
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
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
            "input": messages_to_responses_input(conversation),
            "store": false,
            // Needed to replay reasoning items when nothing is stored server side
            "include": ["reasoning.encrypted_content"],
        });
        if let Some(system) = system {
            payload["instructions"] = json!(system);
        }

        let mut tools_spec = tools_to_responses_spec(tools);
        if options.enable_web_search {
            tools_spec.push(json!({"type": "web_search_preview"}));
        }
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if let Some(temp) = options.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = options.max_tokens {
            payload["max_output_tokens"] = json!(tokens);
        }

        tracing::debug!(
            model = %options.model,
            messages = conversation.len(),
            tools = tools.len(),
            "openai responses request"
        );

        let request = self
            .client
            .post(format!("{}/v1/responses", host))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&payload);
        let response = send_json(request).await?;

        let response = responses_to_llm_response(&response)?;
        tracing::debug!(finish_reason = ?response.finish_reason, usage = ?response.usage, "openai responses response");
        Ok(response)
    }

    fn set_api_key(&self, api_key: &str) {
        self.credentials.set_api_key(api_key);
    }

    fn set_base_url(&self, base_url: &str) {
        self.credentials.set_host(base_url);
    }
}
