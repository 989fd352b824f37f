use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use common::llm::{ChatMessage, LlmClient};

static JUDGE_SYSTEM_PROMPT: &str = r#"You grade a chatbot's answer about Texas child care assistance against a reference answer.

Score these criteria:
- "accuracy" (0-5): factual agreement with the reference; invented numbers or rules score 0-1.
- "completeness" (0-5): how much of the reference's substance the answer covers.
- "citation_quality" (0-5): whether specific claims carry [Doc N] citations that plausibly support them. Omit this criterion only if told to.
- "coherence" (0-3): clarity and organization.

Reply with ONLY a JSON object of integer scores."#;

static CONTEXT_RESOLUTION_ADDENDUM: &str = r#"Additionally score "context_resolution" (0-5): whether the answer correctly resolved pronouns and references from earlier turns (the standalone reformulation of the user's question is provided)."#;

/// Per-criterion scores from the LLM judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScores {
    pub accuracy: u8,
    pub completeness: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_quality: Option<u8>,
    pub coherence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_resolution: Option<u8>,
}

/// Composite score in [0, 100].
///
/// With citations: 50·acc/5 + 30·comp/5 + 10·cit/5 + 10·coh/3.
/// Without: the citation term is dropped and the remaining weights are
/// divided by 0.9, preserving their ratio.
pub fn composite(scores: &JudgeScores, citation_enabled: bool) -> f64 {
    let accuracy = f64::from(scores.accuracy.min(5));
    let completeness = f64::from(scores.completeness.min(5));
    let coherence = f64::from(scores.coherence.min(3));

    let base = 50.0 * accuracy / 5.0 + 30.0 * completeness / 5.0 + 10.0 * coherence / 3.0;
    if citation_enabled {
        let citation = f64::from(scores.citation_quality.unwrap_or(0).min(5));
        base + 10.0 * citation / 5.0
    } else {
        base / 0.9
    }
}

/// LLM judge grading chatbot answers against references.
pub struct Judge {
    llm: LlmClient,
}

impl Judge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn score(
        &self,
        question: &str,
        reference: &str,
        answer: &str,
        citation_enabled: bool,
    ) -> Result<JudgeScores> {
        self.score_inner(question, reference, answer, citation_enabled, None)
            .await
    }

    /// Multi-turn variant: also grades whether conversational references
    /// were resolved, given the reformulated standalone query.
    pub async fn score_turn(
        &self,
        question: &str,
        reference: &str,
        answer: &str,
        citation_enabled: bool,
        reformulated_query: &str,
    ) -> Result<JudgeScores> {
        self.score_inner(
            question,
            reference,
            answer,
            citation_enabled,
            Some(reformulated_query),
        )
        .await
    }

    async fn score_inner(
        &self,
        question: &str,
        reference: &str,
        answer: &str,
        citation_enabled: bool,
        reformulated_query: Option<&str>,
    ) -> Result<JudgeScores> {
        let mut system = JUDGE_SYSTEM_PROMPT.to_string();
        if !citation_enabled {
            system.push_str("\n\nDo NOT score citation_quality; omit the key.");
        }
        if reformulated_query.is_some() {
            system.push_str("\n\n");
            system.push_str(CONTEXT_RESOLUTION_ADDENDUM);
        }

        let mut user = format!(
            "QUESTION:\n{question}\n\nREFERENCE ANSWER:\n{reference}\n\nCHATBOT ANSWER:\n{answer}"
        );
        if let Some(reformulated) = reformulated_query {
            user.push_str(&format!("\n\nSTANDALONE REFORMULATION:\n{reformulated}"));
        }

        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let schema = score_schema(citation_enabled, reformulated_query.is_some());

        let (scores, _usage) = self
            .llm
            .complete_json::<JudgeScores>(&messages, "answer_grading", schema)
            .await?;
        debug!(?scores, "Judge scored answer");
        Ok(scores)
    }
}

fn score_schema(citation_enabled: bool, context_resolution: bool) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = vec![json!("accuracy"), json!("completeness"), json!("coherence")];
    properties.insert(
        "accuracy".into(),
        json!({"type": "integer", "minimum": 0, "maximum": 5}),
    );
    properties.insert(
        "completeness".into(),
        json!({"type": "integer", "minimum": 0, "maximum": 5}),
    );
    properties.insert(
        "coherence".into(),
        json!({"type": "integer", "minimum": 0, "maximum": 3}),
    );
    if citation_enabled {
        properties.insert(
            "citation_quality".into(),
            json!({"type": "integer", "minimum": 0, "maximum": 5}),
        );
        required.push(json!("citation_quality"));
    }
    if context_resolution {
        properties.insert(
            "context_resolution".into(),
            json!({"type": "integer", "minimum": 0, "maximum": 5}),
        );
        required.push(json!("context_resolution"));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(accuracy: u8, completeness: u8, citation: Option<u8>, coherence: u8) -> JudgeScores {
        JudgeScores {
            accuracy,
            completeness,
            citation_quality: citation,
            coherence,
            context_resolution: None,
        }
    }

    #[test]
    fn test_perfect_scores_hit_100() {
        let perfect = scores(5, 5, Some(5), 3);
        assert!((composite(&perfect, true) - 100.0).abs() < 0.1);
        assert!((composite(&perfect, false) - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_weights_with_citation() {
        let s = scores(5, 0, Some(0), 0);
        assert!((composite(&s, true) - 50.0).abs() < 0.1);

        let s = scores(0, 5, Some(0), 0);
        assert!((composite(&s, true) - 30.0).abs() < 0.1);

        let s = scores(0, 0, Some(5), 0);
        assert!((composite(&s, true) - 10.0).abs() < 0.1);

        let s = scores(0, 0, Some(0), 3);
        assert!((composite(&s, true) - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_reweighting_without_citation_preserves_ratio() {
        // 50/0.9 = 55.56, 30/0.9 = 33.33, 10/0.9 = 11.11
        let s = scores(5, 0, None, 0);
        assert!((composite(&s, false) - 55.6).abs() < 0.1);

        let s = scores(0, 5, None, 0);
        assert!((composite(&s, false) - 33.3).abs() < 0.1);

        let s = scores(0, 0, None, 3);
        assert!((composite(&s, false) - 11.1).abs() < 0.1);
    }

    #[test]
    fn test_missing_citation_score_counts_as_zero_when_enabled() {
        let s = scores(5, 5, None, 3);
        assert!((composite(&s, true) - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let s = scores(250, 250, Some(250), 250);
        assert!((composite(&s, true) - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_schema_required_keys_follow_flags() {
        let schema = score_schema(true, true);
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);

        let schema = score_schema(false, false);
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
        assert!(schema["properties"].get("citation_quality").is_none());
    }
}
