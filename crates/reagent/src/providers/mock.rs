use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::ProviderResult;
use crate::models::message::Message;
use crate::models::tool::{ToolCall, ToolDefinition};
use crate::providers::base::{CompletionOptions, LlmResponse, Provider, Usage};

/// Everything one `complete` call received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: CompletionOptions,
}

impl RecordedRequest {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Mutex<VecDeque<ProviderResult<LlmResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<ProviderResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Wait this long before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text(text: &str) -> ProviderResult<LlmResponse> {
        Ok(LlmResponse::new(
            Some(text.to_string()),
            Vec::new(),
            Usage::new(Some(10), Some(5), None),
            None,
        ))
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> ProviderResult<LlmResponse> {
        Ok(LlmResponse::new(
            None,
            calls,
            Usage::new(Some(10), Some(5), None),
            None,
        ))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> ProviderResult<LlmResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            options: options.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        // Return empty response if no more pre-configured responses
        next.unwrap_or_else(|| Ok(LlmResponse::new(None, Vec::new(), Usage::default(), None)))
    }

    fn set_api_key(&self, _api_key: &str) {}

    fn set_base_url(&self, _base_url: &str) {}
}
