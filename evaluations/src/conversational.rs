//! Multi-turn conversational evaluation driven by YAML scripts.
//!
//! ```yaml
//! name: pronoun-follow-up
//! turns:
//!   - question: "What is CCS?"
//!     reference: "CCS is the Child Care Services subsidy program."
//!     expect_topics: ["CCS"]
//!   - question: "How do I apply for it?"
//!     must_contain: ["apply"]
//!     requires_context: true
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use chat_pipeline::{ChatRequest, Chatbot};

use crate::{
    args::Config,
    judge::{composite, Judge, JudgeScores},
};

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationScript {
    pub name: String,
    pub turns: Vec<ScriptTurn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTurn {
    pub question: String,
    /// Reference answer for the judge; expectations stand in when absent.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub expect_topics: Vec<String>,
    #[serde(default)]
    pub must_contain: Vec<String>,
    /// Whether this turn depends on earlier turns being resolved.
    #[serde(default)]
    pub requires_context: bool,
}

impl ScriptTurn {
    fn judge_reference(&self) -> String {
        self.reference.clone().unwrap_or_else(|| {
            format!(
                "A correct answer covers: {}",
                self.expect_topics.join(", ")
            )
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub turn: usize,
    pub question: String,
    pub reformulated_query: Option<String>,
    pub answer: String,
    pub scores: JudgeScores,
    pub composite: f64,
    /// Set only for turns with `requires_context`.
    pub context_resolved: Option<bool>,
    pub passed: bool,
}

/// Aggregated metrics for one scripted conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationResult {
    pub name: String,
    pub turns: Vec<TurnResult>,
    pub average_score: f64,
    pub context_resolution_rate: f64,
    pub all_turns_passed: bool,
}

/// Load every `.yaml`/`.yml` script in the directory, sorted by filename.
pub fn load_scripts(dir: &Path) -> Result<Vec<ConversationScript>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading conversations directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut scripts = Vec::new();
    for path in files {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let script: ConversationScript = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        if script.turns.is_empty() {
            bail!("conversation script {} has no turns", script.name);
        }
        scripts.push(script);
    }

    if scripts.is_empty() {
        bail!("no conversation scripts found under {}", dir.display());
    }
    Ok(scripts)
}

/// Run one script against a fresh thread, judging each turn.
pub async fn run_conversation(
    chatbot: Arc<Chatbot>,
    judge: Arc<Judge>,
    script: &ConversationScript,
    config: &Config,
) -> Result<ConversationResult> {
    let mut session_id: Option<String> = None;
    let mut turns = Vec::with_capacity(script.turns.len());

    for (turn_index, turn) in script.turns.iter().enumerate() {
        let started = Instant::now();
        let outcome = chatbot
            .ask(ChatRequest {
                question: turn.question.clone(),
                session_id: session_id.clone(),
                retrieval_mode: Some(config.mode.as_retrieval_mode()),
                ..ChatRequest::default()
            })
            .await
            .with_context(|| {
                format!("conversation `{}` turn {}", script.name, turn_index + 1)
            })?;
        let elapsed = started.elapsed();
        session_id = Some(outcome.session_id.clone());

        let reformulated = outcome
            .reformulated_query
            .clone()
            .unwrap_or_else(|| turn.question.clone());
        let scores = judge
            .score_turn(
                &turn.question,
                &turn.judge_reference(),
                &outcome.answer,
                config.citation_enabled(),
                &reformulated,
            )
            .await
            .with_context(|| {
                format!("judging conversation `{}` turn {}", script.name, turn_index + 1)
            })?;
        let score = composite(&scores, config.citation_enabled());

        let contains_all = turn
            .must_contain
            .iter()
            .all(|needle| contains_ignore_case(&outcome.answer, needle));
        let context_resolved = turn
            .requires_context
            .then(|| scores.context_resolution.unwrap_or(0) >= 3);

        info!(
            conversation = script.name.as_str(),
            turn = turn_index + 1,
            composite = score,
            elapsed_secs = elapsed.as_secs_f64(),
            "Turn evaluated"
        );

        turns.push(TurnResult {
            turn: turn_index + 1,
            question: turn.question.clone(),
            reformulated_query: outcome.reformulated_query,
            answer: outcome.answer,
            scores,
            composite: score,
            context_resolved,
            passed: contains_all && score >= config.fail_threshold,
        });
    }

    Ok(aggregate(script.name.clone(), turns))
}

fn aggregate(name: String, turns: Vec<TurnResult>) -> ConversationResult {
    let average_score = if turns.is_empty() {
        0.0
    } else {
        turns.iter().map(|t| t.composite).sum::<f64>() / turns.len() as f64
    };

    let context_turns = turns
        .iter()
        .filter(|t| t.context_resolved.is_some())
        .count();
    let context_resolution_rate = if context_turns == 0 {
        1.0
    } else {
        turns
            .iter()
            .filter(|t| t.context_resolved == Some(true))
            .count() as f64
            / context_turns as f64
    };

    let all_turns_passed = turns.iter().all(|t| t.passed);

    ConversationResult {
        name,
        turns,
        average_score,
        context_resolution_rate,
        all_turns_passed,
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(composite_score: f64, context_resolved: Option<bool>, passed: bool) -> TurnResult {
        TurnResult {
            turn: 1,
            question: "q".into(),
            reformulated_query: None,
            answer: "a".into(),
            scores: JudgeScores {
                accuracy: 4,
                completeness: 4,
                citation_quality: Some(4),
                coherence: 3,
                context_resolution: context_resolved.map(|r| if r { 5 } else { 1 }),
            },
            composite: composite_score,
            context_resolved,
            passed,
        }
    }

    #[test]
    fn test_script_parsing_with_defaults() {
        let yaml = r#"
name: pronoun-follow-up
turns:
  - question: "What is CCS?"
    expect_topics: ["CCS", "Child Care Services"]
  - question: "How do I apply for it?"
    must_contain: ["apply"]
    requires_context: true
"#;
        let script: ConversationScript = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(script.turns.len(), 2);
        assert!(!script.turns[0].requires_context);
        assert!(script.turns[1].requires_context);
        assert!(script.turns[0]
            .judge_reference()
            .contains("Child Care Services"));
    }

    #[test]
    fn test_aggregate_metrics() {
        let result = aggregate(
            "test".into(),
            vec![
                turn(90.0, None, true),
                turn(80.0, Some(true), true),
                turn(70.0, Some(false), false),
            ],
        );
        assert!((result.average_score - 80.0).abs() < 1e-9);
        assert!((result.context_resolution_rate - 0.5).abs() < 1e-9);
        assert!(!result.all_turns_passed);
    }

    #[test]
    fn test_context_rate_is_full_when_no_context_turns() {
        let result = aggregate("test".into(), vec![turn(90.0, None, true)]);
        assert!((result.context_resolution_rate - 1.0).abs() < 1e-9);
        assert!(result.all_turns_passed);
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("You can APPLY online.", "apply"));
        assert!(!contains_ignore_case("No match here.", "apply"));
    }
}
