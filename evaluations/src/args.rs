use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum EvalRetrievalMode {
    Dense,
    Hybrid,
    Managed,
}

impl EvalRetrievalMode {
    pub const fn id(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Hybrid => "hybrid",
            Self::Managed => "managed",
        }
    }

    pub const fn as_retrieval_mode(self) -> common::utils::config::RetrievalMode {
        match self {
            Self::Dense => common::utils::config::RetrievalMode::Dense,
            Self::Hybrid => common::utils::config::RetrievalMode::Hybrid,
            Self::Managed => common::utils::config::RetrievalMode::Managed,
        }
    }
}

impl std::fmt::Display for EvalRetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Offline evaluation harness for the childcare-policy chatbot.
#[derive(Debug, Clone, Parser)]
#[command(name = "evaluations")]
pub struct Config {
    /// Directory of markdown Q&A files (### Qn: / **An:** format)
    #[arg(long, default_value = "evaluations/qa")]
    pub qa_dir: PathBuf,

    /// Root directory for run outputs and checkpoints
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Retrieval mode to evaluate
    #[arg(long, default_value_t = EvalRetrievalMode::Hybrid)]
    pub mode: EvalRetrievalMode,

    /// Score answers without the citation-quality criterion
    #[arg(long)]
    pub no_citation: bool,

    /// Resume from the most recent checkpoint for this mode
    #[arg(long)]
    pub resume: bool,

    /// Halt and checkpoint when a composite score falls below the threshold
    #[arg(long, default_value_t = 70.0)]
    pub fail_threshold: f64,

    /// Concurrent questions in flight
    #[arg(long, env = "PARALLEL_WORKERS", default_value_t = 5)]
    pub parallel_workers: usize,

    /// Evaluate a single question by its 1-based position and exit
    #[arg(long)]
    pub question: Option<usize>,

    /// Directory of YAML multi-turn conversation scripts; switches to
    /// conversational evaluation
    #[arg(long)]
    pub conversations_dir: Option<PathBuf>,
}

impl Config {
    pub const fn citation_enabled(&self) -> bool {
        !self.no_citation
    }

    /// Mode-level directory holding checkpoints, debug logs and RUN_* dirs.
    pub fn mode_dir(&self) -> PathBuf {
        self.results_dir.join(self.mode.id())
    }
}

pub fn parse() -> Config {
    Config::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["evaluations"]);
        assert_eq!(config.mode, EvalRetrievalMode::Hybrid);
        assert!(config.citation_enabled());
        assert!(!config.resume);
        assert_eq!(config.parallel_workers, 5);
        assert!((config.fail_threshold - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mode_dir_nests_under_results() {
        let config = Config::parse_from(["evaluations", "--mode", "dense", "--results-dir", "out"]);
        assert_eq!(config.mode_dir(), PathBuf::from("out/dense"));
    }

    #[test]
    fn test_no_citation_flag() {
        let config = Config::parse_from(["evaluations", "--no-citation"]);
        assert!(!config.citation_enabled());
    }
}
