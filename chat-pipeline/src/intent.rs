use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use common::llm::{ChatMessage, LlmClient};

use crate::{prompts, state::Intent};

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
}

/// LLM-backed intent classifier. Only distinguishes policy questions from
/// facility lookups; the web-fallback path is decided later by the
/// sufficiency gate, not here.
pub struct IntentClassifier {
    llm: LlmClient,
}

impl IntentClassifier {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Classify a query. Any parse or upstream failure defaults to
    /// `Information`, which is the safe route.
    pub async fn classify(&self, query: &str) -> Intent {
        let messages = [
            ChatMessage::system(prompts::INTENT_SYSTEM_PROMPT),
            ChatMessage::user(query.to_string()),
        ];
        let schema = json!({
            "type": "object",
            "properties": {
                "intent": {"type": "string", "enum": ["information", "location_search"]}
            },
            "required": ["intent"],
            "additionalProperties": false
        });

        match self
            .llm
            .complete_json::<IntentReply>(&messages, "query_intent", schema)
            .await
        {
            Ok((reply, _usage)) => {
                let intent = parse_intent_label(&reply.intent);
                debug!(?intent, "Query classified");
                intent
            }
            Err(err) => {
                warn!(error = %err, "Intent classification failed; defaulting to information");
                Intent::Information
            }
        }
    }
}

fn parse_intent_label(label: &str) -> Intent {
    match label.trim().to_ascii_lowercase().as_str() {
        "location_search" => Intent::LocationSearch,
        _ => Intent::Information,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_labels() {
        assert_eq!(parse_intent_label("location_search"), Intent::LocationSearch);
        assert_eq!(parse_intent_label("information"), Intent::Information);
    }

    #[test]
    fn test_unknown_label_defaults_to_information() {
        assert_eq!(parse_intent_label("chitchat"), Intent::Information);
        assert_eq!(parse_intent_label(""), Intent::Information);
    }

    #[test]
    fn test_label_parsing_is_case_insensitive() {
        assert_eq!(parse_intent_label(" Location_Search "), Intent::LocationSearch);
    }
}
