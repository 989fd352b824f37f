//! Graph node implementations. Each node is a pure function of the input
//! state producing a partial patch; the orchestrator merges patches.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use common::error::AppError;

use crate::{
    generate::{self, Generator},
    intent::IntentClassifier,
    reformulate::Reformulator,
    rerank::Reranker,
    retrievers::{Retriever, WebSearchRetriever},
    state::{Intent, PipelineState, StatePatch},
    web_fallback::{merge_candidates, WebFallbackPolicy},
    ResponseType,
};

/// One pipeline step. Nodes never mutate state directly.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError>;
}

/// Resolves follow-up queries against the thread history and prepares the
/// conversation context consumed by the reranker and generator.
pub struct ReformulateNode {
    pub reformulator: Arc<Reformulator>,
}

#[async_trait]
impl Node for ReformulateNode {
    fn name(&self) -> &'static str {
        "reformulate"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        let reformulated = self
            .reformulator
            .reformulate(&state.query, &state.messages)
            .await;
        let context = self
            .reformulator
            .conversation_context(&state.messages)
            .await;

        Ok(StatePatch {
            reformulated_query: reformulated,
            conversation_context: context,
            ..StatePatch::default()
        })
    }
}

/// Routes the query to the information or location path.
pub struct ClassifyNode {
    pub classifier: IntentClassifier,
}

#[async_trait]
impl Node for ClassifyNode {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        let intent = self.classifier.classify(state.effective_query()).await;
        Ok(StatePatch {
            intent: Some(intent),
            ..StatePatch::default()
        })
    }
}

/// Top-K candidate generation with the retriever chosen for this request.
pub struct RetrieveNode {
    pub retriever: Arc<dyn Retriever>,
    pub top_k: usize,
}

#[async_trait]
impl Node for RetrieveNode {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        let chunks = self
            .retriever
            .search(state.effective_query(), self.top_k)
            .await?;
        Ok(StatePatch {
            retrieved_chunks: Some(chunks),
            ..StatePatch::default()
        })
    }
}

/// Judge pass over the retrieved candidates.
pub struct RerankNode {
    pub reranker: Reranker,
    pub top_n: usize,
}

#[async_trait]
impl Node for RerankNode {
    fn name(&self) -> &'static str {
        "rerank"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        let outcome = self
            .reranker
            .rerank(
                state.effective_query(),
                state.retrieved_chunks.clone(),
                self.top_n,
                state.conversation_context.as_deref(),
            )
            .await;

        Ok(StatePatch {
            reranked_chunks: Some(outcome.chunks),
            debug_note: outcome.fallback_reason,
            ..StatePatch::default()
        })
    }
}

/// Sufficiency gate: when vector results are weak and web search is
/// configured, supplement with live results and re-judge the merged set.
pub struct WebGateNode {
    pub web_search: Option<Arc<WebSearchRetriever>>,
    pub reranker: Reranker,
    pub policy: WebFallbackPolicy,
    pub web_top_k: usize,
    pub rerank_top_n: usize,
}

#[async_trait]
impl Node for WebGateNode {
    fn name(&self) -> &'static str {
        "web_gate"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        let Some(web_search) = &self.web_search else {
            return Ok(StatePatch::default());
        };
        if self.policy.is_sufficient(&state.reranked_chunks) {
            return Ok(StatePatch::default());
        }

        let web_chunks = match web_search
            .search(state.effective_query(), self.web_top_k)
            .await
        {
            Ok(chunks) => chunks,
            Err(err) => {
                // Degraded but answerable: fall back to the corpus results.
                warn!(error = %err, "Web fallback search failed; answering from corpus only");
                return Ok(StatePatch {
                    debug_note: Some(format!("web fallback skipped: {err}")),
                    ..StatePatch::default()
                });
            }
        };
        if web_chunks.is_empty() {
            return Ok(StatePatch::default());
        }

        let merged = merge_candidates(
            state.retrieved_chunks.clone(),
            web_chunks,
            self.web_top_k,
        );
        let outcome = self
            .reranker
            .rerank(
                state.effective_query(),
                merged.clone(),
                self.rerank_top_n,
                state.conversation_context.as_deref(),
            )
            .await;

        Ok(StatePatch {
            retrieved_chunks: Some(merged),
            reranked_chunks: Some(outcome.chunks),
            response_type: Some(ResponseType::WebFallback),
            debug_note: outcome.fallback_reason,
            ..StatePatch::default()
        })
    }
}

/// Final answer construction with citations.
pub struct GenerateNode {
    pub generator: Generator,
}

#[async_trait]
impl Node for GenerateNode {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, state: &PipelineState) -> Result<StatePatch, AppError> {
        if state.reranked_chunks.is_empty() {
            return Ok(StatePatch {
                answer: Some(generate::fallback_answer()),
                sources: Some(Vec::new()),
                response_type: Some(ResponseType::Information),
                ..StatePatch::default()
            });
        }

        match self
            .generator
            .generate(
                state.effective_query(),
                &state.reranked_chunks,
                state.conversation_context.as_deref(),
            )
            .await
        {
            Ok((answer, sources, _usage)) => Ok(StatePatch {
                answer: Some(answer),
                sources: Some(sources),
                response_type: state
                    .response_type
                    .is_none()
                    .then_some(ResponseType::Information),
                ..StatePatch::default()
            }),
            Err(err) if err.is_upstream() => {
                warn!(error = %err, "Generation failed after retries; using fallback answer");
                Ok(StatePatch {
                    answer: Some(generate::fallback_answer()),
                    sources: Some(Vec::new()),
                    response_type: Some(ResponseType::Information),
                    debug_note: Some(format!("generation fallback: {err}")),
                    ..StatePatch::default()
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Location searches get a templated referral; facility data is not in the
/// corpus.
pub struct LocationNode;

#[async_trait]
impl Node for LocationNode {
    fn name(&self) -> &'static str {
        "location"
    }

    async fn run(&self, _state: &PipelineState) -> Result<StatePatch, AppError> {
        Ok(StatePatch {
            answer: Some(generate::location_answer()),
            sources: Some(Vec::new()),
            response_type: Some(ResponseType::LocationSearch),
            ..StatePatch::default()
        })
    }
}

/// Conditional edge after classification.
pub fn route_intent(state: &PipelineState) -> &'static str {
    match state.intent {
        Some(Intent::LocationSearch) => "location",
        _ => "retrieve",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrievers::test_support::chunk;
    use crate::RankedChunk;

    #[test]
    fn test_route_intent_defaults_to_retrieve() {
        let state = PipelineState::new("q".into(), false);
        assert_eq!(route_intent(&state), "retrieve");
    }

    #[test]
    fn test_route_intent_sends_location_searches_aside() {
        let mut state = PipelineState::new("daycares near 78701".into(), false);
        state.intent = Some(Intent::LocationSearch);
        assert_eq!(route_intent(&state), "location");
    }

    #[tokio::test]
    async fn test_location_node_emits_referral_without_sources() {
        let state = PipelineState::new("find daycare in Austin".into(), false);
        let patch = LocationNode.run(&state).await.unwrap();
        assert_eq!(patch.response_type, Some(ResponseType::LocationSearch));
        assert_eq!(patch.sources.as_deref(), Some(&[] as &[crate::CitedSource]));
        assert!(patch.answer.unwrap().contains("find.childcare.texas.gov"));
    }

    #[tokio::test]
    async fn test_generate_node_falls_back_on_empty_retrieval() {
        let llm = common::llm::LlmClient::new(
            std::sync::Arc::new(async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new().with_api_base("http://127.0.0.1:9"),
            )),
            common::utils::config::Provider::Fast,
            "test-model".to_string(),
            0.1,
        );
        let node = GenerateNode {
            generator: Generator::new(llm),
        };
        let state = PipelineState::new("daycare capacity in Antarctica".into(), false);

        let patch = node.run(&state).await.unwrap();
        assert_eq!(patch.response_type, Some(ResponseType::Information));
        assert!(patch.answer.unwrap().contains("couldn't find information"));
        assert!(patch.sources.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_web_gate_noop_when_unconfigured() {
        let llm = common::llm::LlmClient::new(
            std::sync::Arc::new(async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new().with_api_base("http://127.0.0.1:9"),
            )),
            common::utils::config::Provider::Fast,
            "test-model".to_string(),
            0.1,
        );
        let node = WebGateNode {
            web_search: None,
            reranker: Reranker::new(llm),
            policy: WebFallbackPolicy {
                min_chunks: 3,
                min_score: 0.7,
            },
            web_top_k: 5,
            rerank_top_n: 5,
        };
        let state = PipelineState::new("anything".into(), false);

        let patch = node.run(&state).await.unwrap();
        assert!(patch.retrieved_chunks.is_none());
        assert!(patch.response_type.is_none());
    }

    #[tokio::test]
    async fn test_web_gate_skips_web_when_sufficient() {
        // The retriever below would fail if called; sufficiency must
        // short-circuit before any web traffic.
        let llm = common::llm::LlmClient::new(
            std::sync::Arc::new(async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new().with_api_base("http://127.0.0.1:9"),
            )),
            common::utils::config::Provider::Fast,
            "test-model".to_string(),
            0.1,
        );
        let node = WebGateNode {
            web_search: Some(Arc::new(WebSearchRetriever::new(
                "http://127.0.0.1:9",
                None,
            ))),
            reranker: Reranker::new(llm),
            policy: WebFallbackPolicy {
                min_chunks: 1,
                min_score: 0.5,
            },
            web_top_k: 5,
            rerank_top_n: 5,
        };

        let mut state = PipelineState::new("income limits".into(), false);
        let mut candidate = RankedChunk::new(chunk("a", "a.pdf", "1", "text"), 0.9);
        candidate.rerank_score = Some(0.9);
        state.reranked_chunks = vec![candidate];

        let patch = node.run(&state).await.unwrap();
        assert!(patch.response_type.is_none());
        assert!(patch.reranked_chunks.is_none());
    }
}
