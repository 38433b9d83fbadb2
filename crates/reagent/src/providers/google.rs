use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use super::base::{CompletionOptions, LlmResponse, Provider, Usage};
use super::configs::{GoogleProviderConfig, LiveCredentials};
use super::utils::{
    check_error_body, classify_http_error, group_exchanges, orphan_text, sanitize_function_name,
    split_system, Exchange,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::executor::TOOL_ERROR_PREFIX;
use crate::models::content::ProviderMeta;
use crate::models::message::{Message, Role};
use crate::models::tool::{ToolCall, ToolDefinition};

// Marks ids we made up for function calls that arrived without one
const GENERATED_CALL_PREFIX: &str = "call_gen_";

const PROVIDER_NAME: &str = "google";

pub struct GoogleProvider {
    client: Client,
    credentials: LiveCredentials,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            credentials: LiveCredentials::new(config.host, config.api_key),
        })
    }
}

fn user_parts(message: &Message) -> Vec<Value> {
    let mut parts = Vec::new();
    if let Some(text) = message.text() {
        parts.push(json!({"text": text}));
    }
    for media in &message.media {
        parts.push(json!({
            "inlineData": {"mimeType": media.mime_type, "data": media.data}
        }));
    }
    parts
}

/// Parts of a model turn; the original parts are replayed when this client produced them
fn model_parts(message: &Message) -> Vec<Value> {
    let preserved = message
        .provider_meta
        .as_ref()
        .and_then(|meta| meta.payload_for(PROVIDER_NAME))
        .and_then(|payload| payload.get("parts"))
        .and_then(|parts| parts.as_array());
    if let Some(parts) = preserved {
        return parts.clone();
    }

    let mut parts = Vec::new();
    if let Some(text) = message.text() {
        parts.push(json!({"text": text}));
    }
    for tool_call in message.tool_calls() {
        let mut function_call = json!({
            "name": sanitize_function_name(&tool_call.name),
            "args": tool_call.arguments_value(),
        });
        if let Some(id) = model_call_id(&tool_call.id) {
            function_call["id"] = json!(id);
        }
        parts.push(json!({ "functionCall": function_call }));
    }
    parts
}

/// The id Gemini assigned to a call, or None when we generated it locally
fn model_call_id(id: &str) -> Option<&str> {
    (!id.starts_with(GENERATED_CALL_PREFIX)).then_some(id)
}

fn function_response(call: &ToolCall, content: &str) -> Value {
    let response = match content.strip_prefix(TOOL_ERROR_PREFIX) {
        Some(error) => json!({"error": error.trim_start()}),
        None => json!({"result": content}),
    };
    let mut function_response = json!({
        "name": sanitize_function_name(&call.name),
        "response": response,
    });
    if let Some(id) = model_call_id(&call.id) {
        function_response["id"] = json!(id);
    }
    json!({ "functionResponse": function_response })
}

/// Convert internal messages to Gemini `contents`
pub fn messages_to_google_spec(messages: &[Message]) -> Vec<Value> {
    let mut contents = Vec::new();

    for exchange in group_exchanges(messages) {
        match exchange {
            Exchange::Plain(message) => {
                let (role, parts) = match message.role {
                    Role::Assistant => ("model", model_parts(message)),
                    _ => ("user", user_parts(message)),
                };
                if !parts.is_empty() {
                    contents.push(json!({"role": role, "parts": parts}));
                }
            }
            Exchange::ToolRound { call, replies } => {
                contents.push(json!({"role": "model", "parts": model_parts(call)}));
                let parts: Vec<Value> = replies
                    .iter()
                    .map(|reply| function_response(reply.call, reply.content))
                    .collect();
                contents.push(json!({"role": "user", "parts": parts}));
            }
            Exchange::Orphan(message) => {
                contents.push(json!({"role": "user", "parts": [{"text": orphan_text(message)}]}));
            }
        }
    }

    contents
}

pub fn tools_to_google_spec(tools: &[ToolDefinition]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();
    json!({ "functionDeclarations": declarations })
}

/// Append raw stream bytes to `buffer`, dropping carriage returns.
///
/// 0x0D never occurs inside a multi-byte UTF-8 sequence, so this is safe on
/// chunks cut mid-character.
fn push_stream_bytes(buffer: &mut Vec<u8>, chunk: &[u8]) {
    buffer.extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
}

/// Remove every complete event from `buffer`, returning their `data:` payloads.
///
/// Bytes are decoded only once a whole event is buffered.
fn drain_sse_events(buffer: &mut Vec<u8>) -> ProviderResult<Vec<String>> {
    let mut events = Vec::new();

    while let Some(end) = buffer.windows(2).position(|window| window == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..end + 2).collect();
        let event = std::str::from_utf8(&raw[..end]).map_err(|e| {
            ProviderError::MalformedResponse(format!("invalid UTF-8 in event stream: {}", e))
        })?;
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if !data.is_empty() {
            events.push(data.join("\n"));
        }
    }

    Ok(events)
}

/// Folds streamed `GenerateContentResponse` chunks into one response
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    parts: Vec<Value>,
    tool_calls: Vec<ToolCall>,
    usage: Option<Value>,
    saw_candidate: bool,
    has_signature: bool,
}

impl StreamAccumulator {
    fn push_chunk(&mut self, chunk: &Value) -> ProviderResult<()> {
        if let Some(err) = check_error_body(chunk) {
            return Err(err);
        }
        if let Some(usage) = chunk.get("usageMetadata") {
            self.usage = Some(usage.clone());
        }

        let Some(candidate) = chunk
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        else {
            return Ok(());
        };
        self.saw_candidate = true;

        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.as_array());
        for part in parts.into_iter().flatten() {
            self.push_part(part);
        }
        Ok(())
    }

    fn push_part(&mut self, part: &Value) {
        if part.get("thoughtSignature").is_some() {
            self.has_signature = true;
        }

        let is_thought = part.get("thought").and_then(|t| t.as_bool()).unwrap_or(false);
        if let Some(function_call) = part.get("functionCall") {
            let id = function_call
                .get("id")
                .and_then(|id| id.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("{}{}", GENERATED_CALL_PREFIX, Uuid::new_v4().simple()));
            let name = function_call
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default();
            let args = function_call.get("args").cloned().unwrap_or_else(|| json!({}));
            self.tool_calls.push(ToolCall::new(id, name, args.to_string()));
        } else if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            if !is_thought {
                self.text.push_str(text);
            }
        }
        self.parts.push(part.clone());
    }

    fn finish(self) -> ProviderResult<LlmResponse> {
        if !self.saw_candidate {
            return Err(ProviderError::EmptyResponse("no candidates in response".into()));
        }

        let count = |key: &str| {
            self.usage
                .as_ref()
                .and_then(|usage| usage.get(key))
                .and_then(|v| v.as_i64())
                .map(|v| v as i32)
        };
        let usage = Usage::new(
            count("promptTokenCount"),
            count("candidatesTokenCount"),
            count("totalTokenCount"),
        );

        let provider_meta = self
            .has_signature
            .then(|| ProviderMeta::new(PROVIDER_NAME, json!({ "parts": self.parts })));

        Ok(LlmResponse::new(
            Some(self.text),
            self.tool_calls,
            usage,
            provider_meta,
        ))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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
            "contents": messages_to_google_spec(conversation),
        });
        if let Some(system) = system {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let mut tools_spec = Vec::new();
        if !tools.is_empty() {
            tools_spec.push(tools_to_google_spec(tools));
        }
        if options.enable_web_search {
            tools_spec.push(json!({"google_search": {}}));
        }
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = options.temperature {
            generation_config.insert("temperature".into(), json!(temp));
        }
        if let Some(tokens) = options.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(tokens));
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }

        tracing::debug!(
            model = %options.model,
            messages = conversation.len(),
            tools = tools.len(),
            "gemini streamGenerateContent request"
        );

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                host, options.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let mut accumulator = StreamAccumulator::default();
        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            push_stream_bytes(&mut buffer, &chunk?);
            for data in drain_sse_events(&mut buffer)? {
                let chunk: Value = serde_json::from_str(&data)?;
                accumulator.push_chunk(&chunk)?;
            }
        }
        // A final event may arrive without the trailing blank line
        buffer.extend_from_slice(b"\n\n");
        for data in drain_sse_events(&mut buffer)? {
            let chunk: Value = serde_json::from_str(&data)?;
            accumulator.push_chunk(&chunk)?;
        }

        let response = accumulator.finish()?;
        tracing::debug!(finish_reason = ?response.finish_reason, usage = ?response.usage, "gemini response");
        Ok(response)
    }

    fn set_api_key(&self, api_key: &str) {
        self.credentials.set_api_key(api_key);
    }

    fn set_base_url(&self, base_url: &str) {
        self.credentials.set_host(base_url);
    }
}
