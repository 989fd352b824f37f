use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::{stream, StreamExt};
use tracing::{info, warn};

use chat_pipeline::{ChatRequest, Chatbot};

use crate::{
    args::Config,
    checkpoint::{self, Checkpoint},
    judge::{composite, Judge},
    qa::QaPair,
    report::RunDirectory,
    types::{EvaluationSummary, QuestionResult},
};

/// Run the batch evaluation: ask, judge, record; halt and checkpoint on the
/// first question whose composite falls below the threshold.
pub async fn run_standard(
    chatbot: Arc<Chatbot>,
    judge: Arc<Judge>,
    pairs: Vec<QaPair>,
    config: &Config,
) -> Result<EvaluationSummary> {
    let mode_dir = config.mode_dir();
    std::fs::create_dir_all(&mode_dir)
        .with_context(|| format!("creating {}", mode_dir.display()))?;

    let start_index = if config.resume {
        match checkpoint::load(&mode_dir)? {
            Some(existing) => {
                checkpoint::validate_for_resume(&existing, config.citation_enabled())?;
                info!(
                    last_completed_index = existing.last_completed_index,
                    last_file = existing.last_file.as_str(),
                    "Resuming from checkpoint"
                );
                existing.last_completed_index
            }
            None => {
                warn!("--resume requested but no checkpoint found; starting from the top");
                0
            }
        }
    } else {
        0
    };

    let run_dir = if config.resume {
        match RunDirectory::latest(&mode_dir)? {
            Some(existing) => existing,
            None => RunDirectory::create(&mode_dir, Utc::now())?,
        }
    } else {
        RunDirectory::create(&mode_dir, Utc::now())?
    };
    info!(run_dir = %run_dir.path.display(), "Evaluation run started");

    let total_questions = pairs.len();
    let threshold = config.fail_threshold;
    let citation_enabled = config.citation_enabled();
    let mode = config.mode;

    // Ordered bounded-parallel execution: questions are in flight up to the
    // worker cap, but results are consumed in run order so stop-on-fail
    // semantics stay exact.
    let mut work = stream::iter(pairs.into_iter().enumerate().skip(start_index))
        .map(|(index, pair)| {
            let chatbot = Arc::clone(&chatbot);
            let judge = Arc::clone(&judge);
            async move {
                evaluate_one(&chatbot, &judge, index, pair, citation_enabled, threshold, mode)
                    .await
            }
        })
        .buffered(config.parallel_workers.max(1));

    // On resume, seed with the results the earlier invocation(s) already
    // recorded in this run directory so the summary and report cover the
    // whole run, not just the resumed segment.
    let mut results = if config.resume {
        let prior = run_dir.recorded_results()?;
        if !prior.is_empty() {
            info!(prior = prior.len(), "Reloaded results from earlier invocation");
        }
        prior
    } else {
        Vec::new()
    };
    let mut halting_failure = None;
    let mut halted_at = None;

    while let Some(outcome) = work.next().await {
        let result = outcome?;
        let index = result.index;
        info!(
            index,
            composite = result.composite,
            passed = result.passed,
            "Question evaluated"
        );

        if !result.passed {
            // Progress up to but not including this question; the failed
            // question itself is re-evaluated on resume.
            checkpoint::save(
                &mode_dir,
                &Checkpoint {
                    last_completed_index: index,
                    last_file: result.file.clone(),
                    citation_enabled,
                    timestamp: Utc::now().to_rfc3339(),
                },
            )?;
            halted_at = Some(index);
            halting_failure = Some(result);
            warn!(index, "Composite below threshold; halting run");
            break;
        }

        run_dir.append_result(&result)?;
        results.push(result);
    }

    if halted_at.is_none() {
        checkpoint::remove(&mode_dir)?;
    }

    let summary = EvaluationSummary::from_results(
        config.mode.id(),
        citation_enabled,
        total_questions,
        &results,
        halted_at,
        run_dir.path.display().to_string(),
        Utc::now().to_rfc3339(),
    );
    run_dir.write_summary(&summary)?;
    run_dir.write_report(&summary, &results)?;
    if let Some(failure) = halting_failure {
        run_dir.write_failure_analysis(&[failure])?;
    }

    Ok(summary)
}

/// Evaluate a single question by run-order index, for inspection.
pub async fn run_single(
    chatbot: Arc<Chatbot>,
    judge: Arc<Judge>,
    pair: QaPair,
    index: usize,
    config: &Config,
) -> Result<QuestionResult> {
    evaluate_one(
        &chatbot,
        &judge,
        index,
        pair,
        config.citation_enabled(),
        config.fail_threshold,
        config.mode,
    )
    .await
}

async fn evaluate_one(
    chatbot: &Chatbot,
    judge: &Judge,
    index: usize,
    pair: QaPair,
    citation_enabled: bool,
    threshold: f64,
    mode: crate::args::EvalRetrievalMode,
) -> Result<QuestionResult> {
    let started = Instant::now();
    let outcome = chatbot
        .ask(ChatRequest {
            question: pair.question.clone(),
            retrieval_mode: Some(mode.as_retrieval_mode()),
            ..ChatRequest::default()
        })
        .await
        .with_context(|| format!("asking question index {index} ({} Q{})", pair.file, pair.number))?;
    let response_time_secs = started.elapsed().as_secs_f64();

    let scores = judge
        .score(&pair.question, &pair.answer, &outcome.answer, citation_enabled)
        .await
        .with_context(|| format!("judging question index {index}"))?;
    let score = composite(&scores, citation_enabled);

    Ok(QuestionResult {
        index,
        number: pair.number,
        file: pair.file,
        question: pair.question,
        reference_answer: pair.answer,
        answer: outcome.answer,
        sources: outcome.sources,
        response_type: outcome.response_type.to_string(),
        response_time_secs,
        scores,
        composite: score,
        passed: score >= threshold,
    })
}
