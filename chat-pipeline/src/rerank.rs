use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use common::{
    error::AppError,
    llm::{ChatMessage, LlmClient},
};

use crate::{prompts, RankedChunk};

/// Cap applied to each chunk before batching, so a full candidate set fits
/// a single judge prompt on every provider.
const CHUNK_CHAR_CAP: usize = 300;

/// Result of a rerank pass. `fallback_reason` is set when the judge could
/// not be used and retrieval order was kept.
#[derive(Debug)]
pub struct RerankOutcome {
    pub chunks: Vec<RankedChunk>,
    pub fallback_reason: Option<String>,
}

/// LLM-as-judge reranker: scores all candidates in one batched prompt and
/// keeps the top n.
pub struct Reranker {
    llm: LlmClient,
}

impl Reranker {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Score `chunks` against `query` and return the best `n`. Judge
    /// failures never block the pipeline: on a malformed reply (after the
    /// client's schema-reminder retry) or an exhausted upstream, the
    /// original retrieval order is kept and the reason reported.
    pub async fn rerank(
        &self,
        query: &str,
        chunks: Vec<RankedChunk>,
        n: usize,
        conversation_summary: Option<&str>,
    ) -> RerankOutcome {
        if chunks.is_empty() {
            return RerankOutcome {
                chunks,
                fallback_reason: None,
            };
        }

        let messages = build_judge_messages(query, &chunks, conversation_summary);
        let schema = score_schema(chunks.len());

        match self
            .llm
            .complete_json::<Map<String, Value>>(&messages, "chunk_relevance_scores", schema)
            .await
        {
            Ok((scores, _usage)) => {
                let ranked = apply_scores(chunks, &scores, n);
                debug!(kept = ranked.len(), "Rerank completed");
                RerankOutcome {
                    chunks: ranked,
                    fallback_reason: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "Judge unusable; falling back to retrieval order");
                let mut kept = chunks;
                kept.truncate(n);
                // Identity rerank: retrieval score stands in for the judge.
                for chunk in &mut kept {
                    chunk.rerank_score = None;
                }
                RerankOutcome {
                    chunks: kept,
                    fallback_reason: Some(format!("rerank fallback: {err}")),
                }
            }
        }
    }
}

fn build_judge_messages(
    query: &str,
    chunks: &[RankedChunk],
    conversation_summary: Option<&str>,
) -> Vec<ChatMessage> {
    let mut system = prompts::RERANK_SYSTEM_PROMPT.to_string();
    if conversation_summary.is_some() {
        system.push_str("\n\n");
        system.push_str(prompts::RERANK_CONVERSATION_HINT);
    }

    let mut user = String::new();
    if let Some(summary) = conversation_summary {
        user.push_str("CONVERSATION SUMMARY:\n");
        user.push_str(summary);
        user.push_str("\n\n");
    }
    user.push_str("QUESTION: ");
    user.push_str(query);
    user.push_str("\n\n");
    for (i, candidate) in chunks.iter().enumerate() {
        user.push_str(&format!("CHUNK {i}:\n{}\n\n", truncate_chars(&candidate.chunk.text, CHUNK_CHAR_CAP)));
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

fn score_schema(count: usize) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::with_capacity(count);
    for i in 0..count {
        let key = format!("chunk_{i}");
        properties.insert(
            key.clone(),
            json!({"type": "integer", "minimum": 0, "maximum": 10}),
        );
        required.push(Value::String(key));
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Attach normalized judge scores and keep the top n. Missing keys score 0,
/// unknown keys are ignored, and ties keep the original retrieval order
/// (the sort is stable).
fn apply_scores(chunks: Vec<RankedChunk>, scores: &Map<String, Value>, n: usize) -> Vec<RankedChunk> {
    let mut judged: Vec<RankedChunk> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, mut candidate)| {
            let raw = scores
                .get(&format!("chunk_{i}"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            candidate.rerank_score = Some((raw.clamp(0.0, 10.0) / 10.0) as f32);
            candidate
        })
        .collect();

    judged.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    judged.truncate(n);
    judged
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrievers::test_support::chunk;

    fn candidates(n: usize) -> Vec<RankedChunk> {
        (0..n)
            .map(|i| {
                RankedChunk::new(
                    chunk(&format!("c{i}"), "doc.pdf", "1", &format!("chunk text {i}")),
                    1.0 - i as f32 * 0.1,
                )
            })
            .collect()
    }

    #[test]
    fn test_apply_scores_sorts_and_normalizes() {
        let mut scores = Map::new();
        scores.insert("chunk_0".into(), json!(2));
        scores.insert("chunk_1".into(), json!(9));
        scores.insert("chunk_2".into(), json!(5));

        let ranked = apply_scores(candidates(3), &scores, 3);
        assert_eq!(ranked[0].chunk.id, "c1");
        assert!((ranked[0].rerank_score.unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(ranked[2].chunk.id, "c0");
    }

    #[test]
    fn test_missing_keys_score_zero_and_extra_keys_ignored() {
        let mut scores = Map::new();
        scores.insert("chunk_1".into(), json!(10));
        scores.insert("chunk_99".into(), json!(10));
        scores.insert("unrelated".into(), json!("x"));

        let ranked = apply_scores(candidates(3), &scores, 3);
        assert_eq!(ranked[0].chunk.id, "c1");
        assert!((ranked[1].rerank_score.unwrap()).abs() < f32::EPSILON);
        assert!((ranked[2].rerank_score.unwrap()).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ties_keep_retrieval_order_and_top_n_is_enforced() {
        let mut scores = Map::new();
        for i in 0..4 {
            scores.insert(format!("chunk_{i}"), json!(7));
        }

        let ranked = apply_scores(candidates(4), &scores, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.id, "c0");
        assert_eq!(ranked[1].chunk.id, "c1");
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let mut scores = Map::new();
        scores.insert("chunk_0".into(), json!(25));
        let ranked = apply_scores(candidates(1), &scores, 1);
        assert!((ranked[0].rerank_score.unwrap() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_judge_prompt_numbers_chunks_and_caps_length() {
        let mut long = candidates(2);
        long[0].chunk.text = "x".repeat(1000);
        let messages = build_judge_messages("What is the income limit?", &long, None);
        let user = &messages[1].content;
        assert!(user.contains("CHUNK 0:"));
        assert!(user.contains("CHUNK 1:"));
        // 300-char cap plus the surrounding scaffolding.
        assert!(user.len() < 1000);
    }

    #[test]
    fn test_conversation_summary_is_prepended() {
        let messages = build_judge_messages(
            "What about a family of 4?",
            &candidates(1),
            Some("User is asking about CCS income limits."),
        );
        assert!(messages[0].content.contains("summary of the conversation"));
        assert!(messages[1].content.starts_with("CONVERSATION SUMMARY:"));
    }

    #[test]
    fn test_score_schema_lists_every_chunk() {
        let schema = score_schema(3);
        assert_eq!(schema["required"].as_array().unwrap().len(), 3);
        assert!(schema["properties"]["chunk_2"].is_object());
    }
}
