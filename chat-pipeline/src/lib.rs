pub mod generate;
pub mod graph;
pub mod intent;
pub mod memory;
pub mod nodes;
pub mod prompts;
pub mod reformulate;
pub mod rerank;
pub mod retrievers;
pub mod state;
pub mod web_fallback;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use common::{
    error::AppError,
    llm::{LlmRole, LlmRouter, ModelOverrides},
    storage::{chunk::Chunk, ChunkStore},
    utils::config::{AppConfig, RetrievalMode},
};

use generate::Generator;
use graph::Graph;
use intent::IntentClassifier;
use memory::{ConversationMemory, MessageRole};
use reformulate::Reformulator;
use rerank::Reranker;
use retrievers::{
    DenseRetriever, EmbeddingProvider, HybridRetriever, ManagedRetriever, Retriever,
    WebSearchRetriever,
};
use state::{DebugRecord, PipelineState};

/// How a request was ultimately answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Information,
    LocationSearch,
    WebFallback,
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::LocationSearch => write!(f, "location_search"),
            Self::WebFallback => write!(f, "web_fallback"),
        }
    }
}

/// A chunk carrying its per-query scores. `retrieval_score` is whatever the
/// retrieval stage produced (similarity or RRF mass); `rerank_score` is the
/// judge's normalized relevance in [0, 1].
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub retrieval_score: f32,
    pub rerank_score: Option<f32>,
}

impl RankedChunk {
    pub fn new(chunk: Chunk, retrieval_score: f32) -> Self {
        Self {
            chunk,
            retrieval_score,
            rerank_score: None,
        }
    }
}

/// A document the generated answer actually cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedSource {
    pub doc_number: usize,
    pub filename: String,
    pub page: String,
    pub source_url: String,
}

/// One question, plus the per-request knobs the API accepts.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub question: String,
    pub session_id: Option<String>,
    pub retrieval_mode: Option<RetrievalMode>,
    pub overrides: ModelOverrides,
    pub debug: bool,
}

/// The answer and everything the caller needs to render it.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: String,
    pub sources: Vec<CitedSource>,
    pub response_type: ResponseType,
    pub session_id: String,
    pub reformulated_query: Option<String>,
    pub turn_count: Option<usize>,
    pub debug_info: Vec<DebugRecord>,
}

/// The assembled question-answering engine. One instance serves all
/// requests; per-request state lives in [`PipelineState`].
pub struct Chatbot {
    config: AppConfig,
    llm_router: Arc<LlmRouter>,
    store: Arc<dyn ChunkStore>,
    memory: Arc<dyn ConversationMemory>,
    embedder: Arc<EmbeddingProvider>,
    web_search: Option<Arc<WebSearchRetriever>>,
    managed_search: Option<Arc<ManagedRetriever>>,
}

impl Chatbot {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ChunkStore>,
        memory: Arc<dyn ConversationMemory>,
    ) -> Result<Self, AppError> {
        let llm_router = Arc::new(LlmRouter::new(&config)?);
        let embedder = Arc::new(EmbeddingProvider::new(
            llm_router.embedding_client(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        ));

        let web_search = config.web_search_api_url.as_ref().map(|url| {
            Arc::new(WebSearchRetriever::new(
                url,
                config.web_search_api_key.clone(),
            ))
        });
        let managed_search = config
            .managed_search_api_url
            .as_ref()
            .map(|url| Arc::new(ManagedRetriever::new(url)));

        Ok(Self {
            config,
            llm_router,
            store,
            memory,
            embedder,
            web_search,
            managed_search,
        })
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Answer one question. In conversational mode the turn is appended to
    /// the session's thread after the answer is produced.
    #[instrument(skip_all, fields(conversational = self.config.conversational_mode))]
    pub async fn ask(&self, request: ChatRequest) -> Result<ChatOutcome, AppError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidArgument(
                "question must be non-empty".to_string(),
            ));
        }

        let retrieval_mode = request.retrieval_mode.unwrap_or(self.config.retrieval_mode);
        let retriever = self.retriever_for_mode(retrieval_mode)?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let conversational = self.config.conversational_mode;

        let mut state = PipelineState::new(question.to_string(), request.debug);
        if conversational {
            state.thread_id = Some(session_id.clone());
            state.messages = self
                .memory
                .recent(&session_id, self.config.max_history_turns)
                .await?;
        }

        let graph = self.build_graph(retriever, &request.overrides);
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_secs(self.config.request_timeout_secs);
        let state = graph.run(state, conversational, deadline).await?;

        let answer = state
            .answer
            .clone()
            .unwrap_or_else(generate::fallback_answer);
        let response_type = state.response_type.unwrap_or(ResponseType::Information);

        let turn_count = if conversational {
            self.memory
                .append(&session_id, MessageRole::User, question)
                .await?;
            self.memory
                .append(&session_id, MessageRole::Assistant, &answer)
                .await?;
            Some(self.memory.message_count(&session_id).await? / 2)
        } else {
            None
        };

        Ok(ChatOutcome {
            answer,
            sources: state.sources,
            response_type,
            session_id,
            reformulated_query: state.reformulated_query,
            turn_count,
            debug_info: state.debug_info,
        })
    }

    fn retriever_for_mode(&self, mode: RetrievalMode) -> Result<Arc<dyn Retriever>, AppError> {
        match mode {
            RetrievalMode::Dense => Ok(Arc::new(DenseRetriever::new(
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
                self.config.min_similarity,
            ))),
            RetrievalMode::Hybrid => Ok(Arc::new(HybridRetriever::new(
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
            ))),
            RetrievalMode::Managed => self
                .managed_search
                .as_ref()
                .map(|retriever| Arc::clone(retriever) as Arc<dyn Retriever>)
                .ok_or_else(|| {
                    AppError::InvalidArgument(
                        "managed retrieval requested but no managed search endpoint configured"
                            .to_string(),
                    )
                }),
        }
    }

    fn build_graph(&self, retriever: Arc<dyn Retriever>, overrides: &ModelOverrides) -> Graph {
        let reformulator = Reformulator::new(
            self.llm_router.for_role(LlmRole::Reformulator, overrides),
            self.config.max_history_turns,
        );
        let classifier = IntentClassifier::new(
            self.llm_router.for_role(LlmRole::IntentClassifier, overrides),
        );
        let reranker = Reranker::new(self.llm_router.for_role(LlmRole::Reranker, overrides));
        let generator = Generator::new(self.llm_router.for_role(LlmRole::Generator, overrides));
        let gate_reranker = Reranker::new(self.llm_router.for_role(LlmRole::Reranker, overrides));

        Graph::standard(
            reformulator,
            classifier,
            retriever,
            reranker,
            generator,
            gate_reranker,
            self.web_search.clone(),
            &self.config,
        )
    }
}
