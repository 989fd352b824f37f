//! Minimal typed-graph engine: named nodes, static edges, and a single
//! conditional edge after classification. Execution is single-threaded per
//! request; concurrency across requests belongs to the runtime.

use std::{collections::HashMap, sync::Arc, time::Instant};

use tracing::{debug, instrument};

use common::{error::AppError, utils::config::AppConfig};

use crate::{
    generate::Generator,
    intent::IntentClassifier,
    nodes::{
        route_intent, ClassifyNode, GenerateNode, LocationNode, Node, ReformulateNode,
        RerankNode, RetrieveNode, WebGateNode,
    },
    reformulate::Reformulator,
    rerank::Reranker,
    retrievers::{Retriever, WebSearchRetriever},
    state::{DebugRecord, PipelineState},
    web_fallback::WebFallbackPolicy,
};

/// Where control flows after a node finishes.
enum Edge {
    To(&'static str),
    Conditional(fn(&PipelineState) -> &'static str),
    End,
}

pub struct Graph {
    nodes: HashMap<&'static str, Box<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
}

impl Graph {
    /// The production graph:
    ///
    /// ```text
    /// START → (reformulate?) → classify ─┬─> retrieve → rerank → web_gate → generate → END
    ///                                    └─> location → END
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn standard(
        reformulator: Reformulator,
        classifier: IntentClassifier,
        retriever: Arc<dyn Retriever>,
        reranker: Reranker,
        generator: Generator,
        gate_reranker: Reranker,
        web_search: Option<Arc<WebSearchRetriever>>,
        config: &AppConfig,
    ) -> Self {
        let mut nodes: HashMap<&'static str, Box<dyn Node>> = HashMap::new();
        nodes.insert(
            "reformulate",
            Box::new(ReformulateNode {
                reformulator: Arc::new(reformulator),
            }),
        );
        nodes.insert("classify", Box::new(ClassifyNode { classifier }));
        nodes.insert(
            "retrieve",
            Box::new(RetrieveNode {
                retriever,
                top_k: config.retrieval_top_k,
            }),
        );
        nodes.insert(
            "rerank",
            Box::new(RerankNode {
                reranker,
                top_n: config.rerank_top_k,
            }),
        );
        nodes.insert(
            "web_gate",
            Box::new(WebGateNode {
                web_search,
                reranker: gate_reranker,
                policy: WebFallbackPolicy {
                    min_chunks: config.web_fallback_min_chunks,
                    min_score: config.web_fallback_min_score,
                },
                web_top_k: config.web_search_top_k,
                rerank_top_n: config.rerank_top_k,
            }),
        );
        nodes.insert("generate", Box::new(GenerateNode { generator }));
        nodes.insert("location", Box::new(LocationNode));

        let mut edges = HashMap::new();
        edges.insert("reformulate", Edge::To("classify"));
        edges.insert("classify", Edge::Conditional(route_intent));
        edges.insert("retrieve", Edge::To("rerank"));
        edges.insert("rerank", Edge::To("web_gate"));
        edges.insert("web_gate", Edge::To("generate"));
        edges.insert("generate", Edge::End);
        edges.insert("location", Edge::End);

        Self { nodes, edges }
    }

    /// Execute from the appropriate entry node. The deadline covers the
    /// whole walk; an exhausted deadline aborts the in-flight node (its
    /// future is dropped, cancelling any pending I/O) and discards partial
    /// state.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut state: PipelineState,
        conversational: bool,
        deadline: tokio::time::Instant,
    ) -> Result<PipelineState, AppError> {
        let mut current = if conversational { "reformulate" } else { "classify" };

        loop {
            let node = self.nodes.get(current).ok_or_else(|| {
                AppError::InternalError(format!("graph has no node named `{current}`"))
            })?;

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .filter(|left| !left.is_zero())
                .ok_or_else(|| {
                    AppError::DeadlineExceeded(format!(
                        "request deadline hit before node `{current}`"
                    ))
                })?;

            let started = Instant::now();
            let inputs_summary = summarize_state(&state);
            let mut patch = tokio::time::timeout(remaining, node.run(&state))
                .await
                .map_err(|_| {
                    AppError::DeadlineExceeded(format!(
                        "request deadline hit inside node `{current}`"
                    ))
                })??;
            let elapsed_ms = started.elapsed().as_millis();

            if let Some(note) = patch.debug_note.take() {
                state.debug_info.push(DebugRecord {
                    node: current.to_string(),
                    elapsed_ms,
                    inputs_summary: inputs_summary.clone(),
                    outputs_summary: note,
                });
            }
            if state.debug {
                state.debug_info.push(DebugRecord {
                    node: current.to_string(),
                    elapsed_ms,
                    inputs_summary,
                    outputs_summary: summarize_patch(&patch),
                });
            }
            debug!(node = current, elapsed_ms = elapsed_ms as u64, "Node completed");

            state.apply(patch);

            current = match self.edges.get(current) {
                Some(Edge::To(next)) => *next,
                Some(Edge::Conditional(route)) => route(&state),
                Some(Edge::End) => return Ok(state),
                None => {
                    return Err(AppError::InternalError(format!(
                        "graph has no edge out of `{current}`"
                    )))
                }
            };
        }
    }
}

fn summarize_state(state: &PipelineState) -> String {
    format!(
        "query_chars={}, reformulated={}, retrieved={}, reranked={}",
        state.query.chars().count(),
        state.reformulated_query.is_some(),
        state.retrieved_chunks.len(),
        state.reranked_chunks.len()
    )
}

fn summarize_patch(patch: &crate::state::StatePatch) -> String {
    let mut parts = Vec::new();
    if patch.reformulated_query.is_some() {
        parts.push("reformulated_query".to_string());
    }
    if patch.conversation_context.is_some() {
        parts.push("conversation_context".to_string());
    }
    if let Some(intent) = patch.intent {
        parts.push(format!("intent={intent:?}"));
    }
    if let Some(retrieved) = &patch.retrieved_chunks {
        parts.push(format!("retrieved={}", retrieved.len()));
    }
    if let Some(reranked) = &patch.reranked_chunks {
        parts.push(format!("reranked={}", reranked.len()));
    }
    if patch.answer.is_some() {
        parts.push("answer".to_string());
    }
    if let Some(sources) = &patch.sources {
        parts.push(format!("sources={}", sources.len()));
    }
    if let Some(response_type) = patch.response_type {
        parts.push(format!("response_type={response_type}"));
    }
    if parts.is_empty() {
        "no-op".to_string()
    } else {
        parts.join(", ")
    }
}
