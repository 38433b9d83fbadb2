use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, AgentResult};
use crate::executor::{ToolExecutionResult, ToolExecutor};
use crate::meta_tools::{self, ACTIVATE_TOOLS, SUMMARIZE_CONVERSATION};
use crate::models::message::Message;
use crate::models::tool::{ToolCall, ToolDefinition};
use crate::providers::base::{CompletionOptions, LlmResponse, Provider, Usage};
use crate::registry::ToolRegistry;
use crate::settings::AgentSettings;
use crate::summarizer::{CompactionHook, Summarizer};
use crate::token_counter::{context_window, TokenCounter};

/// Where an agent is in its reason-then-act loop
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Idle,
    Thinking,
    ExecutingTools,
    Completed(String),
    Error {
        message: String,
        cause: Option<AgentError>,
    },
}

#[derive(Debug)]
struct Shared {
    state: Mutex<AgentState>,
    pending: Mutex<Vec<Message>>,
    running: Mutex<Option<CancellationToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state(&self, state: AgentState) {
        tracing::debug!(?state, "agent state");
        *lock(&self.state) = state;
    }

    fn take_pending(&self) -> Vec<Message> {
        std::mem::take(&mut *lock(&self.pending))
    }

    fn has_pending(&self) -> bool {
        !lock(&self.pending).is_empty()
    }
}

/// Cloneable remote control for an agent, usable from any task or thread
#[derive(Debug, Clone)]
pub struct AgentHandle {
    shared: Arc<Shared>,
}

impl AgentHandle {
    /// Abort the running turn, if any, and force the state back to Idle
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.shared.running).as_ref() {
            token.cancel();
        }
        self.shared.set_state(AgentState::Idle);
    }

    /// Queue a user message; it joins the history once the current iteration finishes
    pub fn inject(&self, message: Message) {
        lock(&self.shared.pending).push(message);
    }

    pub fn state(&self) -> AgentState {
        lock(&self.shared.state).clone()
    }
}

/// Agent drives one conversation: it calls the provider, runs the tools the
/// model asks for and feeds their results back until a final answer arrives.
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    summarizer: Summarizer,
    counter: TokenCounter,
    settings: AgentSettings,
    history: Vec<Message>,
    /// None when activation is unsupported; every registry tool is then visible
    active_categories: Option<BTreeSet<String>>,
    usage: Usage,
    shared: Arc<Shared>,
}

impl Agent {
    /// Create a new Agent with activation gating over `registry`
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        settings: AgentSettings,
    ) -> Self {
        Self::build(provider, registry, settings, Some(BTreeSet::new()))
    }

    /// Create a sub-agent that sees all of `registry` and cannot activate categories.
    ///
    /// Callers usually pass a restricted copy from `ToolRegistry::copy_filtered`.
    pub fn delegated(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        settings: AgentSettings,
    ) -> Self {
        Self::build(provider, registry, settings, None)
    }

    fn build(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        settings: AgentSettings,
        active_categories: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            provider,
            registry,
            executor: ToolExecutor::new(),
            summarizer: Summarizer::new(settings.keep_recent, settings.summarize_threshold),
            counter: TokenCounter::new(),
            settings,
            history: Vec::new(),
            active_categories,
            usage: Usage::default(),
            shared: Arc::new(Shared {
                state: Mutex::new(AgentState::Idle),
                pending: Mutex::new(Vec::new()),
                running: Mutex::new(None),
            }),
        }
    }

    /// Restore a conversation persisted from an earlier session
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_compaction_hook(mut self, hook: Arc<dyn CompactionHook>) -> Self {
        self.summarizer.set_hook(Some(hook));
        self
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.handle().state()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn active_categories(&self) -> Option<&BTreeSet<String>> {
        self.active_categories.as_ref()
    }

    /// Token usage summed over every provider call this agent made
    pub fn total_usage(&self) -> &Usage {
        &self.usage
    }

    /// Clear the conversation and return to Idle
    pub fn reset(&mut self) {
        self.history.clear();
        self.shared.take_pending();
        if let Some(active) = &mut self.active_categories {
            active.clear();
        }
        self.usage = Usage::default();
        self.shared.set_state(AgentState::Idle);
    }

    /// Run one user turn to completion and return the final answer.
    ///
    /// `system_prompt` is sent first in every request but never stored in the
    /// history.
    pub async fn execute(
        &mut self,
        user_message: Message,
        system_prompt: &str,
        model: &str,
    ) -> AgentResult<String> {
        let token = CancellationToken::new();
        *lock(&self.shared.running) = Some(token.clone());

        // Messages queued while idle came first
        let mut injected = self.shared.take_pending();
        self.history.append(&mut injected);
        self.history.push(user_message);
        let checkpoint = self.history.clone();

        self.shared.set_state(AgentState::Thinking);
        let result = self.run(system_prompt, model, &token, &mut injected).await;
        *lock(&self.shared.running) = None;

        match result {
            Ok(text) => {
                self.shared.set_state(AgentState::Completed(text.clone()));
                Ok(text)
            }
            Err(AgentError::Cancelled) => {
                tracing::warn!("turn cancelled, discarding partial progress");
                self.history = checkpoint;
                // Injected messages the cancelled turn consumed go back in the queue
                let mut pending = lock(&self.shared.pending);
                let later = std::mem::take(&mut *pending);
                pending.extend(injected);
                pending.extend(later);
                drop(pending);
                self.shared.set_state(AgentState::Idle);
                Err(AgentError::Cancelled)
            }
            Err(err) => {
                tracing::error!(error = %err, "agent turn failed");
                self.shared.set_state(AgentState::Error {
                    message: err.to_string(),
                    cause: Some(err.clone()),
                });
                Err(err)
            }
        }
    }

    async fn run(
        &mut self,
        system_prompt: &str,
        model: &str,
        token: &CancellationToken,
        injected: &mut Vec<Message>,
    ) -> AgentResult<String> {
        let mut options = CompletionOptions::new(model)
            .with_temperature(self.settings.temperature)
            .with_web_search(self.settings.enable_web_search);
        if let Some(max_tokens) = self.settings.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        for iteration in 0..self.settings.max_iterations {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let tools = self.visible_tools();
            self.summarize_if_needed(system_prompt, &tools, &options, token)
                .await?;

            tracing::debug!(iteration, messages = self.history.len(), "calling provider");
            let response = self
                .complete_with_recovery(system_prompt, &tools, &options, token)
                .await?;
            self.usage.accumulate(&response.usage);

            if let Some(calls) = response.tool_calls.clone().filter(|calls| !calls.is_empty()) {
                self.shared.set_state(AgentState::ExecutingTools);
                self.history.push(response.to_message());

                let results = self.run_tools(&calls, &options, token).await?;
                for (call, result) in calls.iter().zip(results) {
                    self.history
                        .push(Message::tool(&call.id, &call.name, result.to_content()));
                }

                self.merge_injected(injected);
                self.shared.set_state(AgentState::Thinking);
                continue;
            }

            let Some(text) = response.text().map(String::from) else {
                return Err(AgentError::EmptyFinalResponse);
            };
            self.history.push(response.to_message());
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            if self.shared.has_pending() {
                // Answer what arrived while the model was thinking
                self.merge_injected(injected);
                continue;
            }
            return Ok(text);
        }

        Err(AgentError::MaxIterations(self.settings.max_iterations))
    }

    fn merge_injected(&mut self, injected: &mut Vec<Message>) {
        let pending = self.shared.take_pending();
        if pending.is_empty() {
            return;
        }
        tracing::debug!(count = pending.len(), "merging injected messages");
        injected.extend(pending.iter().cloned());
        self.history.extend(pending);
    }

    /// Registry tools visible right now plus the meta-tools
    fn visible_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .registry
            .get_tool_definitions(self.active_categories.as_ref())
            .into_iter()
            .filter(|tool| !meta_tools::is_meta_tool(&tool.name))
            .collect();

        if let Some(active) = &self.active_categories {
            let inactive: BTreeSet<String> = self
                .registry
                .get_on_demand_categories()
                .difference(active)
                .cloned()
                .collect();
            if !inactive.is_empty() {
                tools.push(meta_tools::activate_tools_definition(&inactive));
            }
        }
        tools.push(meta_tools::summarize_conversation_definition());
        tools
    }

    async fn complete(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        options: &CompletionOptions,
        token: &CancellationToken,
    ) -> AgentResult<LlmResponse> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(Message::system().with_text(system_prompt));
        }
        messages.extend(self.history.iter().cloned());

        tokio::select! {
            _ = token.cancelled() => Err(AgentError::Cancelled),
            result = self.provider.complete(&messages, tools, options) => Ok(result?),
        }
    }

    /// Call the provider, summarizing once and retrying if the context overflowed
    async fn complete_with_recovery(
        &mut self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        options: &CompletionOptions,
        token: &CancellationToken,
    ) -> AgentResult<LlmResponse> {
        match self.complete(system_prompt, tools, options, token).await {
            Err(AgentError::Provider(err)) if err.is_context_overflow() => {
                tracing::warn!(error = %err, "context window exceeded, summarizing history");
                if !self.compact(options, token, true).await? {
                    return Err(AgentError::ContextOverflow);
                }
                match self.complete(system_prompt, tools, options, token).await {
                    Err(AgentError::Provider(err)) if err.is_context_overflow() => {
                        Err(AgentError::ContextOverflow)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn summarize_if_needed(
        &mut self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        options: &CompletionOptions,
        token: &CancellationToken,
    ) -> AgentResult<()> {
        let window = self
            .settings
            .context_window
            .unwrap_or_else(|| context_window(&options.model));
        let estimate = self
            .counter
            .estimate_messages(Some(system_prompt), &self.history, tools);
        if !self.summarizer.should_summarize(estimate, window) {
            return Ok(());
        }

        tracing::info!(estimate, window, "history is close to the context window");
        match self.compact(options, token, false).await {
            Err(AgentError::Summarization(message)) => {
                // The request may still fit, so carry on
                tracing::warn!(error = %message, "proactive summarization failed");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Replace older history with a summary; false when nothing could be folded
    async fn compact(
        &mut self,
        options: &CompletionOptions,
        token: &CancellationToken,
        force: bool,
    ) -> AgentResult<bool> {
        let options = options.clone().with_web_search(false);
        let compaction = tokio::select! {
            _ = token.cancelled() => return Err(AgentError::Cancelled),
            result = self.summarizer.compact(self.provider.as_ref(), &options, &self.history, force) => result?,
        };

        match compaction {
            Some(compaction) => {
                self.usage.accumulate(&compaction.usage);
                self.history = compaction.history;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one batch of tool calls; results come back in call order
    async fn run_tools(
        &mut self,
        calls: &[ToolCall],
        options: &CompletionOptions,
        token: &CancellationToken,
    ) -> AgentResult<Vec<ToolExecutionResult>> {
        let mut results: Vec<Option<ToolExecutionResult>> = vec![None; calls.len()];
        let mut dispatch = Vec::new();
        let mut dispatch_slots = Vec::new();

        for (index, call) in calls.iter().enumerate() {
            if meta_tools::is_meta_tool(&call.name) {
                continue;
            }
            match self.inactive_category(&call.name) {
                Some(category) => results[index] = Some(inactive_failure(&call.name, &category)),
                None => {
                    dispatch.push(call.clone());
                    dispatch_slots.push(index);
                }
            }
        }

        if !dispatch.is_empty() {
            let outputs = tokio::select! {
                _ = token.cancelled() => return Err(AgentError::Cancelled),
                outputs = self.executor.execute_batch(&dispatch, &self.registry) => outputs,
            };
            for (slot, output) in dispatch_slots.into_iter().zip(outputs) {
                results[slot] = Some(output);
            }
        }

        for (index, call) in calls.iter().enumerate() {
            match call.name.as_str() {
                ACTIVATE_TOOLS => {
                    let available = self.registry.get_on_demand_categories();
                    results[index] = Some(meta_tools::activate(
                        self.active_categories.as_mut(),
                        &available,
                        &call.arguments,
                    ));
                }
                SUMMARIZE_CONVERSATION => {
                    results[index] = Some(self.summarize_on_request(options, token).await?);
                }
                _ => {}
            }
        }

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    ToolExecutionResult::Failure("No result was produced for this call".into())
                })
            })
            .collect())
    }

    /// Category of a registered tool hidden behind activation, if any
    fn inactive_category(&self, name: &str) -> Option<String> {
        let active = self.active_categories.as_ref()?;
        let entry = self.registry.get_tool(name)?;
        (!entry.is_core() && !active.contains(&entry.category)).then_some(entry.category)
    }

    async fn summarize_on_request(
        &mut self,
        options: &CompletionOptions,
        token: &CancellationToken,
    ) -> AgentResult<ToolExecutionResult> {
        // The assistant message carrying this call must stay right before its results
        let Some(call_message) = self.history.pop() else {
            return Err(AgentError::Internal("tool call message missing from history".into()));
        };
        let before = self.history.len();
        let outcome = self.compact(options, token, true).await;
        let after = self.history.len();
        self.history.push(call_message);

        match outcome {
            Ok(true) => Ok(ToolExecutionResult::Success(format!(
                "Conversation summarized: {} earlier messages were replaced by a summary.",
                (before + 1).saturating_sub(after)
            ))),
            Ok(false) => Ok(ToolExecutionResult::Success(
                "The conversation is already short; nothing was summarized.".into(),
            )),
            Err(AgentError::Summarization(message)) => Ok(ToolExecutionResult::Failure(message)),
            Err(err) => Err(err),
        }
    }
}

fn inactive_failure(name: &str, category: &str) -> ToolExecutionResult {
    ToolExecutionResult::Failure(format!(
        "Tool '{}' belongs to the '{}' category, which is not active. \
         Call {} with {{\"categories\": [\"{}\"]}} first.",
        name, category, ACTIVATE_TOOLS, category
    ))
}
