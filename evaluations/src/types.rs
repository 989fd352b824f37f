use chat_pipeline::CitedSource;
use serde::{Deserialize, Serialize};

use crate::judge::JudgeScores;

/// One graded question, as written to `detailed_results.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    /// 0-based position in the run order.
    pub index: usize,
    /// The question's own number within its file.
    pub number: usize,
    pub file: String,
    pub question: String,
    pub reference_answer: String,
    pub answer: String,
    pub sources: Vec<CitedSource>,
    pub response_type: String,
    pub response_time_secs: f64,
    pub scores: JudgeScores,
    pub composite: f64,
    pub passed: bool,
}

/// Aggregate metrics for a run, written to `evaluation_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub mode: String,
    pub citation_enabled: bool,
    pub total_questions: usize,
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_composite: f64,
    pub average_response_time_secs: f64,
    /// 0-based index of the question that halted the run, if any.
    pub halted_at: Option<usize>,
    pub run_dir: String,
    pub timestamp: String,
}

impl EvaluationSummary {
    pub fn from_results(
        mode: &str,
        citation_enabled: bool,
        total_questions: usize,
        results: &[QuestionResult],
        halted_at: Option<usize>,
        run_dir: String,
        timestamp: String,
    ) -> Self {
        let completed = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let average = |f: fn(&QuestionResult) -> f64| {
            if completed == 0 {
                0.0
            } else {
                results.iter().map(f).sum::<f64>() / completed as f64
            }
        };

        Self {
            mode: mode.to_string(),
            citation_enabled,
            total_questions,
            completed,
            passed,
            failed: completed - passed,
            average_composite: average(|r| r.composite),
            average_response_time_secs: average(|r| r.response_time_secs),
            halted_at,
            run_dir,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, composite: f64, passed: bool) -> QuestionResult {
        QuestionResult {
            index,
            number: index + 1,
            file: "qa.md".into(),
            question: "q".into(),
            reference_answer: "ref".into(),
            answer: "ans".into(),
            sources: Vec::new(),
            response_type: "information".into(),
            response_time_secs: 2.0,
            scores: crate::judge::JudgeScores {
                accuracy: 5,
                completeness: 5,
                citation_quality: Some(5),
                coherence: 3,
                context_resolution: None,
            },
            composite,
            passed,
        }
    }

    #[test]
    fn test_summary_aggregates() {
        let results = vec![result(0, 90.0, true), result(1, 60.0, false)];
        let summary = EvaluationSummary::from_results(
            "hybrid",
            true,
            20,
            &results,
            Some(1),
            "results/hybrid/RUN_X".into(),
            "2026-08-01T00:00:00Z".into(),
        );
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.average_composite - 75.0).abs() < 1e-9);
        assert_eq!(summary.halted_at, Some(1));
    }

    #[test]
    fn test_summary_handles_empty_results() {
        let summary = EvaluationSummary::from_results(
            "dense",
            false,
            0,
            &[],
            None,
            "results/dense/RUN_X".into(),
            "2026-08-01T00:00:00Z".into(),
        );
        assert!((summary.average_composite).abs() < f64::EPSILON);
        assert_eq!(summary.failed, 0);
    }
}
