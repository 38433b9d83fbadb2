use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, Role};
use crate::prompt_template::{load_prompt, SUMMARIZE_PROMPT};
use crate::providers::base::{CompletionOptions, Provider, Usage};

// Longer transcript entries are cut before they reach the summary request
const MAX_ENTRY_CHARS: usize = 2_000;

/// Runs right before summarized messages are dropped from history.
///
/// Implementations typically persist whatever they need from `messages`. An
/// error is logged and compaction proceeds anyway.
#[async_trait]
pub trait CompactionHook: Send + Sync {
    async fn before_discard(&self, messages: &[Message]) -> anyhow::Result<()>;
}

/// Result of one compaction
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    /// Summary message followed by the recent messages
    pub history: Vec<Message>,
    /// Number of messages folded into the summary
    pub discarded: usize,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
struct TranscriptLine {
    speaker: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct SummaryContext<'a> {
    previous_summary: Option<&'a str>,
    transcript: Vec<TranscriptLine>,
}

/// Compacts history once it grows past a share of the context window
#[derive(Clone)]
pub struct Summarizer {
    keep_recent: usize,
    threshold: f64,
    hook: Option<Arc<dyn CompactionHook>>,
}

impl Summarizer {
    pub fn new(keep_recent: usize, threshold: f64) -> Self {
        Self {
            keep_recent,
            threshold,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompactionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn set_hook(&mut self, hook: Option<Arc<dyn CompactionHook>>) {
        self.hook = hook;
    }

    pub fn should_summarize(&self, estimated_tokens: usize, context_window: usize) -> bool {
        context_window > 0 && estimated_tokens as f64 >= context_window as f64 * self.threshold
    }

    /// Index where the recent suffix starts, or None when there is nothing to fold.
    ///
    /// `force` shrinks the kept suffix for short histories so an explicit
    /// request still compacts something. The suffix never starts with a tool
    /// message, so a tool round is never split from its call.
    pub fn split_point(&self, history: &[Message], force: bool) -> Option<usize> {
        let keep = if force && history.len() <= self.keep_recent {
            history.len() / 2
        } else {
            self.keep_recent
        };
        let mut split = history.len().checked_sub(keep)?;
        while split > 0 && split < history.len() && history[split].role == Role::Tool {
            split -= 1;
        }

        // Only an earlier summary in front of the split leaves nothing new to fold
        let foldable = history[..split].iter().any(|message| !message.summary);
        (split > 0 && foldable).then_some(split)
    }

    /// Summarize everything before the split point and rebuild the history.
    ///
    /// Returns Ok(None) when the history is too short to compact.
    pub async fn compact(
        &self,
        provider: &dyn Provider,
        options: &CompletionOptions,
        history: &[Message],
        force: bool,
    ) -> AgentResult<Option<Compaction>> {
        let Some(split) = self.split_point(history, force) else {
            tracing::debug!(messages = history.len(), "nothing to summarize");
            return Ok(None);
        };
        let (prefix, recent) = history.split_at(split);

        let prompt = render_summary_request(prefix)?;
        let response = provider
            .complete(&[Message::user().with_text(prompt)], &[], options)
            .await
            .map_err(|e| AgentError::Summarization(e.to_string()))?;
        let summary = response
            .text()
            .map(str::trim)
            .ok_or_else(|| AgentError::Summarization("the model returned an empty summary".into()))?;

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.before_discard(prefix).await {
                tracing::warn!(error = %e, "compaction hook failed");
            }
        }

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(Message::summary(summary));
        compacted.extend(recent.iter().filter(|message| !message.summary).cloned());

        tracing::info!(
            discarded = prefix.len(),
            kept = recent.len(),
            "summarized conversation history"
        );
        Ok(Some(Compaction {
            history: compacted,
            discarded: prefix.len(),
            usage: response.usage,
        }))
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ENTRY_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_ENTRY_CHARS).collect();
    format!("{}...", cut)
}

fn transcript(messages: &[Message]) -> Vec<TranscriptLine> {
    let mut lines = Vec::new();
    for message in messages.iter().filter(|message| !message.summary) {
        let text = message.text().map(truncate);
        match message.role {
            Role::Assistant => {
                if let Some(text) = text {
                    lines.push(TranscriptLine {
                        speaker: "Assistant".into(),
                        text,
                    });
                }
                for call in message.tool_calls() {
                    lines.push(TranscriptLine {
                        speaker: "Assistant".into(),
                        text: format!("called {} with {}", call.name, truncate(&call.arguments)),
                    });
                }
            }
            Role::Tool => lines.push(TranscriptLine {
                speaker: format!("Tool {}", message.name.as_deref().unwrap_or("result")),
                text: text.unwrap_or_default(),
            }),
            Role::User | Role::System => {
                let mut text = text.unwrap_or_default();
                if !message.media.is_empty() {
                    text.push_str(&format!(" [{} attachment(s)]", message.media.len()));
                }
                let speaker = if message.role == Role::User { "User" } else { "System" };
                lines.push(TranscriptLine {
                    speaker: speaker.into(),
                    text,
                });
            }
        }
    }
    lines
}

fn render_summary_request(prefix: &[Message]) -> AgentResult<String> {
    let context = SummaryContext {
        previous_summary: prefix.iter().find_map(|message| message.summary_text()),
        transcript: transcript(prefix),
    };
    load_prompt(SUMMARIZE_PROMPT, &context)
        .map_err(|e| AgentError::Internal(format!("failed to render summary prompt: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::SUMMARY_PREFIX;
    use crate::models::tool::ToolCall;
    use crate::providers::mock::MockProvider;
    use std::sync::Mutex;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user().with_text("plan a trip to Lisbon"),
            Message::assistant().with_text("Sure, when?"),
            Message::user().with_text("next week"),
            Message::assistant().with_tool_call(ToolCall::new("1", "flights", r#"{"to":"LIS"}"#)),
            Message::tool("1", "flights", "TP123 at 9am"),
            Message::assistant().with_text("TP123 leaves at 9am."),
        ]
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CompactionHook for RecordingHook {
        async fn before_discard(&self, messages: &[Message]) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(messages.len());
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl CompactionHook for FailingHook {
        async fn before_discard(&self, _messages: &[Message]) -> anyhow::Result<()> {
            anyhow::bail!("database offline")
        }
    }

    #[test]
    fn test_should_summarize() {
        let summarizer = Summarizer::new(4, 0.8);
        assert!(!summarizer.should_summarize(799, 1000));
        assert!(summarizer.should_summarize(800, 1000));
    }

    #[test]
    fn test_split_never_starts_with_tool_message() {
        let history = conversation();
        // keep 2 would start the suffix at the tool result
        let summarizer = Summarizer::new(2, 0.8);
        assert_eq!(summarizer.split_point(&history, false), Some(3));
        assert_eq!(history[3].role, Role::Assistant);

        assert_eq!(Summarizer::new(10, 0.8).split_point(&history, false), None);
        assert_eq!(Summarizer::new(10, 0.8).split_point(&history, true), Some(3));
    }

    #[test]
    fn test_split_skips_lone_summary() {
        let history = vec![
            Message::summary("earlier"),
            Message::user().with_text("a"),
            Message::assistant().with_text("b"),
        ];
        assert_eq!(Summarizer::new(2, 0.8).split_point(&history, false), None);
    }

    #[tokio::test]
    async fn test_compact_replaces_prefix_with_one_summary() {
        let provider = MockProvider::new(vec![MockProvider::text("User is flying TP123 to Lisbon.")]);
        let hook = Arc::new(RecordingHook::default());
        let summarizer = Summarizer::new(2, 0.8).with_hook(hook.clone());

        let compaction = summarizer
            .compact(&provider, &CompletionOptions::new("gpt-4o"), &conversation(), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(compaction.discarded, 3);
        assert_eq!(compaction.history.len(), 4);
        assert!(compaction.history[0].summary);
        assert_eq!(compaction.history[0].role, Role::User);
        assert_eq!(
            compaction.history[0].text(),
            Some(format!("{}\nUser is flying TP123 to Lisbon.", SUMMARY_PREFIX).as_str())
        );
        assert_eq!(*hook.seen.lock().unwrap(), vec![3]);

        let requests = provider.requests();
        let request = &requests[0];
        assert!(request.tools.is_empty());
        let prompt = request.messages[0].text().unwrap();
        assert!(prompt.contains("User: plan a trip to Lisbon"));
        assert!(!prompt.contains("TP123"));
    }

    #[tokio::test]
    async fn test_summaries_do_not_stack() {
        let provider = MockProvider::new(vec![MockProvider::text("second summary")]);
        let mut history = vec![Message::summary("first summary")];
        history.extend(conversation());

        let compaction = Summarizer::new(2, 0.8)
            .with_hook(Arc::new(FailingHook))
            .compact(&provider, &CompletionOptions::new("gpt-4o"), &history, false)
            .await
            .unwrap()
            .unwrap();

        let summaries: Vec<_> = compaction.history.iter().filter(|m| m.summary).collect();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].summary_text(), Some("second summary"));

        let prompt = provider.requests()[0].messages[0].text().unwrap().to_string();
        assert!(prompt.contains("first summary"));
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let provider = MockProvider::new(vec![MockProvider::text("   ")]);
        let err = Summarizer::new(2, 0.8)
            .compact(&provider, &CompletionOptions::new("gpt-4o"), &conversation(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Summarization(_)));
    }
}
