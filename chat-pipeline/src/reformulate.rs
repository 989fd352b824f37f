use tracing::{debug, warn};

use common::llm::{ChatMessage, LlmClient};

use crate::{
    memory::{format_history, ThreadMessage},
    prompts,
};

/// Rough character budget mirroring the summary's token budget.
const SUMMARIZE_AFTER_CHARS: usize = 4000;

/// Rewrites context-dependent follow-ups into standalone queries and
/// compresses long histories for downstream prompts.
pub struct Reformulator {
    llm: LlmClient,
    /// The configured history window, in turns. The memory store hands out
    /// at most `2 * max_history_turns` messages, so a full window is the
    /// signal that the thread has outgrown raw history.
    max_history_turns: usize,
}

impl Reformulator {
    pub fn new(llm: LlmClient, max_history_turns: usize) -> Self {
        Self {
            llm,
            max_history_turns,
        }
    }

    /// Produce a standalone form of `query`, or `None` to use it as-is.
    /// First turns pass through untouched, as does anything the model
    /// fails to wrap in the expected tags.
    pub async fn reformulate(&self, query: &str, history: &[ThreadMessage]) -> Option<String> {
        if history.len() <= 1 {
            return None;
        }

        let user = format!(
            "Conversation so far:\n{}\n\nLatest user question: {}",
            format_history(history),
            query
        );
        let messages = [
            ChatMessage::system(prompts::REFORMULATE_SYSTEM_PROMPT),
            ChatMessage::user(user),
        ];

        match self.llm.complete(&messages).await {
            Ok((reply, _usage)) => match extract_tagged(&reply, "reformulated_query") {
                Some(standalone) if !standalone.is_empty() => {
                    debug!(%standalone, "Query reformulated");
                    Some(standalone)
                }
                _ => {
                    warn!("Reformulator reply had no usable tag; keeping original query");
                    None
                }
            },
            Err(err) => {
                warn!(error = %err, "Reformulation failed; keeping original query");
                None
            }
        }
    }

    /// Conversation context for downstream prompts: raw history while the
    /// thread is short, a ≤150-token summary once it grows. The summary is
    /// derived per call and never persisted.
    pub async fn conversation_context(&self, history: &[ThreadMessage]) -> Option<String> {
        if history.is_empty() {
            return None;
        }

        let formatted = format_history(history);
        let over_budget = history.len() >= self.max_history_turns.saturating_mul(2)
            || formatted.chars().count() > SUMMARIZE_AFTER_CHARS;
        if !over_budget {
            return Some(formatted);
        }

        let messages = [
            ChatMessage::system(prompts::SUMMARIZE_SYSTEM_PROMPT),
            ChatMessage::user(formatted.clone()),
        ];
        match self.llm.complete(&messages).await {
            Ok((summary, _usage)) => Some(summary.trim().to_string()),
            Err(err) => {
                warn!(error = %err, "History summarization failed; using raw history");
                Some(formatted)
            }
        }
    }
}

/// Extract the span wrapped in `<tag>...</tag>`, trimmed.
fn extract_tagged(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}
