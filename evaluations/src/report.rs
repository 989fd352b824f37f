use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::types::{EvaluationSummary, QuestionResult};

/// A timestamped run directory under `results/<mode>/`.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    pub path: PathBuf,
}

impl RunDirectory {
    /// Create `results/<mode>/RUN_YYYYMMDD_HHMMSS/`.
    pub fn create(mode_dir: &Path, now: DateTime<Utc>) -> Result<Self> {
        let name = format!("RUN_{}", now.format("%Y%m%d_%H%M%S"));
        let path = mode_dir.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating run directory {}", path.display()))?;
        Ok(Self { path })
    }

    /// The most recent `RUN_*` directory. The timestamp format sorts
    /// lexicographically, so the name ordering is the time ordering.
    pub fn latest(mode_dir: &Path) -> Result<Option<Self>> {
        if !mode_dir.exists() {
            return Ok(None);
        }
        let mut runs: Vec<PathBuf> = std::fs::read_dir(mode_dir)
            .with_context(|| format!("reading {}", mode_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("RUN_"))
            })
            .collect();
        runs.sort();
        Ok(runs.pop().map(|path| Self { path }))
    }

    /// Append one result to `detailed_results.jsonl`.
    pub fn append_result(&self, result: &QuestionResult) -> Result<()> {
        let path = self.path.join("detailed_results.jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let line = serde_json::to_string(result).context("serializing result entry")?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Results already recorded in this directory, used when resuming into
    /// an existing run so the summary covers the whole run, not just the
    /// resumed segment.
    pub fn recorded_results(&self) -> Result<Vec<QuestionResult>> {
        let path = self.path.join("detailed_results.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .with_context(|| format!("parsing result entry in {}", path.display()))
            })
            .collect()
    }

    pub fn write_summary(&self, summary: &EvaluationSummary) -> Result<()> {
        let path = self.path.join("evaluation_summary.json");
        let payload =
            serde_json::to_string_pretty(summary).context("serializing evaluation summary")?;
        std::fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn write_report(
        &self,
        summary: &EvaluationSummary,
        results: &[QuestionResult],
    ) -> Result<()> {
        let mut report = String::new();
        report.push_str("CHILD CARE POLICY CHATBOT EVALUATION\n");
        report.push_str("====================================\n\n");
        report.push_str(&format!("Run:               {}\n", summary.run_dir));
        report.push_str(&format!("Retrieval mode:    {}\n", summary.mode));
        report.push_str(&format!(
            "Citation scoring:  {}\n",
            if summary.citation_enabled { "enabled" } else { "disabled" }
        ));
        report.push_str(&format!("Timestamp:         {}\n\n", summary.timestamp));
        report.push_str(&format!(
            "Questions:         {} completed of {} total\n",
            summary.completed, summary.total_questions
        ));
        report.push_str(&format!(
            "Passed / failed:   {} / {}\n",
            summary.passed, summary.failed
        ));
        report.push_str(&format!(
            "Average composite: {:.1}\n",
            summary.average_composite
        ));
        report.push_str(&format!(
            "Average latency:   {:.2}s\n",
            summary.average_response_time_secs
        ));
        if let Some(index) = summary.halted_at {
            report.push_str(&format!(
                "\nRun HALTED at question index {index} (score below threshold); checkpoint written.\n"
            ));
        }

        report.push_str("\nPER-QUESTION SCORES\n-------------------\n");
        for result in results {
            report.push_str(&format!(
                "[{}] {} Q{}: composite {:.1} ({})\n",
                result.index,
                result.file,
                result.number,
                result.composite,
                if result.passed { "pass" } else { "FAIL" }
            ));
        }

        let path = self.path.join("evaluation_report.txt");
        std::fs::write(&path, report).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Written only when at least one question failed.
    pub fn write_failure_analysis(&self, results: &[QuestionResult]) -> Result<()> {
        let failures: Vec<&QuestionResult> = results.iter().filter(|r| !r.passed).collect();
        if failures.is_empty() {
            return Ok(());
        }

        let mut analysis = String::new();
        analysis.push_str("FAILURE ANALYSIS\n================\n\n");
        for failure in failures {
            analysis.push_str(&format!(
                "{} Q{} (index {}) - composite {:.1}\n",
                failure.file, failure.number, failure.index, failure.composite
            ));
            analysis.push_str(&format!("  Question:  {}\n", failure.question));
            analysis.push_str(&format!("  Reference: {}\n", failure.reference_answer));
            analysis.push_str(&format!("  Answer:    {}\n", failure.answer));
            analysis.push_str(&format!(
                "  Scores:    accuracy={} completeness={} citation={:?} coherence={}\n\n",
                failure.scores.accuracy,
                failure.scores.completeness,
                failure.scores.citation_quality,
                failure.scores.coherence
            ));
        }

        let path = self.path.join("failure_analysis.txt");
        std::fs::write(&path, analysis)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeScores;
    use tempfile::TempDir;

    fn result(index: usize, passed: bool) -> QuestionResult {
        QuestionResult {
            index,
            number: index + 1,
            file: "qa.md".into(),
            question: "What is the limit?".into(),
            reference_answer: "$92,041".into(),
            answer: "The limit is $92,041 [Doc 1].".into(),
            sources: Vec::new(),
            response_type: "information".into(),
            response_time_secs: 1.5,
            scores: JudgeScores {
                accuracy: if passed { 5 } else { 1 },
                completeness: 4,
                citation_quality: Some(5),
                coherence: 3,
                context_resolution: None,
            },
            composite: if passed { 94.0 } else { 42.0 },
            passed,
        }
    }

    #[test]
    fn test_create_and_find_latest_run() {
        let dir = TempDir::new().unwrap();
        let t1 = "2026-08-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let t2 = "2026-08-01T11:30:45Z".parse::<DateTime<Utc>>().unwrap();

        RunDirectory::create(dir.path(), t1).unwrap();
        let newer = RunDirectory::create(dir.path(), t2).unwrap();

        let latest = RunDirectory::latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest.path, newer.path);
        assert!(latest
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("RUN_20260801_113045"));
    }

    #[test]
    fn test_latest_on_missing_dir_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(RunDirectory::latest(&dir.path().join("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_append_then_reload_results() {
        let dir = TempDir::new().unwrap();
        let run = RunDirectory::create(dir.path(), Utc::now()).unwrap();

        assert!(run.recorded_results().unwrap().is_empty());
        run.append_result(&result(0, true)).unwrap();
        run.append_result(&result(1, false)).unwrap();

        let reloaded = run.recorded_results().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].index, 0);
        assert_eq!(reloaded[1].index, 1);
        assert!((reloaded[0].composite - 94.0).abs() < 1e-9);
        assert!(!reloaded[1].passed);

        let content =
            std::fs::read_to_string(run.path.join("detailed_results.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_failure_analysis_only_written_on_failures() {
        let dir = TempDir::new().unwrap();
        let run = RunDirectory::create(dir.path(), Utc::now()).unwrap();

        run.write_failure_analysis(&[result(0, true)]).unwrap();
        assert!(!run.path.join("failure_analysis.txt").exists());

        run.write_failure_analysis(&[result(0, true), result(1, false)])
            .unwrap();
        let analysis =
            std::fs::read_to_string(run.path.join("failure_analysis.txt")).unwrap();
        assert!(analysis.contains("Q2"));
        assert!(!analysis.contains("Q1 (index 0)"));
    }
}
