mod args;
mod checkpoint;
mod conversational;
mod judge;
mod qa;
mod report;
mod runner;
mod types;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use chat_pipeline::{memory::InMemoryConversationStore, Chatbot};
use common::{
    llm::{LlmRole, LlmRouter, ModelOverrides},
    storage::qdrant::QdrantStore,
    utils::config::get_config,
};

use judge::Judge;
use report::RunDirectory;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let config = args::parse();

    let mut app_config = get_config().context("loading application config")?;
    // Conversational scripts exercise the reformulation path; batch Q&A
    // must not accumulate cross-question history.
    app_config.conversational_mode = config.conversations_dir.is_some();

    let store = Arc::new(QdrantStore::new(
        &app_config.qdrant_api_url,
        app_config.qdrant_api_key.clone(),
        &app_config.qdrant_collection,
    ));
    let memory = Arc::new(InMemoryConversationStore::new(
        app_config.session_timeout_minutes,
    ));
    let chatbot = Arc::new(
        Chatbot::new(app_config.clone(), store, memory).context("initializing chatbot")?,
    );

    let judge_router = LlmRouter::new(&app_config).context("initializing judge LLM router")?;
    let judge = Arc::new(Judge::new(
        judge_router.for_role(LlmRole::Generator, &ModelOverrides::default()),
    ));

    if let Some(conversations_dir) = &config.conversations_dir {
        let scripts = conversational::load_scripts(conversations_dir)?;
        info!(scripts = scripts.len(), "Running conversational evaluation");

        let mode_dir = config.mode_dir();
        std::fs::create_dir_all(&mode_dir)
            .with_context(|| format!("creating {}", mode_dir.display()))?;
        let run_dir = RunDirectory::create(&mode_dir, Utc::now())?;

        let mut all_passed = true;
        for script in &scripts {
            let result = conversational::run_conversation(
                Arc::clone(&chatbot),
                Arc::clone(&judge),
                script,
                &config,
            )
            .await?;
            all_passed &= result.all_turns_passed;
            println!(
                "{}: avg {:.1}, context resolution {:.0}%, {}",
                result.name,
                result.average_score,
                result.context_resolution_rate * 100.0,
                if result.all_turns_passed { "all turns passed" } else { "TURNS FAILED" }
            );

            let line = serde_json::to_string(&result)?;
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.path.join("conversation_results.jsonl"))?;
            writeln!(file, "{line}")?;
        }

        if !all_passed {
            bail!("one or more conversation scripts failed");
        }
        return Ok(());
    }

    let pairs = qa::load_qa_dir(&config.qa_dir)?;
    info!(questions = pairs.len(), mode = %config.mode, "Loaded Q&A dataset");

    if let Some(position) = config.question {
        let index = position
            .checked_sub(1)
            .context("--question is 1-based and must be at least 1")?;
        let pair = pairs
            .get(index)
            .with_context(|| format!("no question at position {position}"))?
            .clone();
        let result =
            runner::run_single(chatbot, judge, pair, index, &config).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let summary = runner::run_standard(chatbot, judge, pairs, &config).await?;
    println!(
        "Completed {}/{} questions (avg composite {:.1}); results in {}",
        summary.completed, summary.total_questions, summary.average_composite, summary.run_dir
    );
    if let Some(index) = summary.halted_at {
        bail!("run halted at question index {index}; checkpoint written - fix and rerun with --resume");
    }

    Ok(())
}
