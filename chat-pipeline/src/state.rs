use serde::Serialize;

use crate::{memory::ThreadMessage, CitedSource, RankedChunk, ResponseType};

/// The intent classifier's routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Information,
    LocationSearch,
}

/// One per-node trace entry, emitted when the request has `debug` set.
#[derive(Debug, Clone, Serialize)]
pub struct DebugRecord {
    pub node: String,
    pub elapsed_ms: u128,
    pub inputs_summary: String,
    pub outputs_summary: String,
}

/// Request-scoped pipeline state. Created per request, mutated only by
/// applying node patches in graph order, dropped on return.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub query: String,
    pub reformulated_query: Option<String>,
    /// History rendered (or summarized) for downstream prompts; produced by
    /// the reformulation node in conversational mode.
    pub conversation_context: Option<String>,
    pub thread_id: Option<String>,
    pub intent: Option<Intent>,
    pub retrieved_chunks: Vec<RankedChunk>,
    pub reranked_chunks: Vec<RankedChunk>,
    pub answer: Option<String>,
    pub sources: Vec<CitedSource>,
    pub response_type: Option<ResponseType>,
    pub messages: Vec<ThreadMessage>,
    pub debug: bool,
    pub debug_info: Vec<DebugRecord>,
}

impl PipelineState {
    pub fn new(query: String, debug: bool) -> Self {
        Self {
            query,
            debug,
            ..Self::default()
        }
    }

    /// The query string retrieval and reranking must agree on: the
    /// reformulated form when one exists, the raw query otherwise.
    pub fn effective_query(&self) -> &str {
        self.reformulated_query.as_deref().unwrap_or(&self.query)
    }
}

/// Partial state produced by one node. Only populated fields are merged, so
/// a node cannot clobber what it did not compute.
#[derive(Debug, Default)]
pub struct StatePatch {
    pub reformulated_query: Option<String>,
    pub conversation_context: Option<String>,
    pub intent: Option<Intent>,
    pub retrieved_chunks: Option<Vec<RankedChunk>>,
    pub reranked_chunks: Option<Vec<RankedChunk>>,
    pub answer: Option<String>,
    pub sources: Option<Vec<CitedSource>>,
    pub response_type: Option<ResponseType>,
    pub debug_note: Option<String>,
}

impl PipelineState {
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(reformulated) = patch.reformulated_query {
            self.reformulated_query = Some(reformulated);
        }
        if let Some(context) = patch.conversation_context {
            self.conversation_context = Some(context);
        }
        if let Some(intent) = patch.intent {
            self.intent = Some(intent);
        }
        if let Some(retrieved) = patch.retrieved_chunks {
            self.retrieved_chunks = retrieved;
        }
        if let Some(reranked) = patch.reranked_chunks {
            self.reranked_chunks = reranked;
        }
        if let Some(answer) = patch.answer {
            self.answer = Some(answer);
        }
        if let Some(sources) = patch.sources {
            self.sources = sources;
        }
        if let Some(response_type) = patch.response_type {
            self.response_type = Some(response_type);
        }
    }
}
