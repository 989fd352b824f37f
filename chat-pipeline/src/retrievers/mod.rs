mod managed;
mod web;

pub use managed::ManagedRetriever;
pub use web::WebSearchRetriever;

use std::{cmp::Ordering, sync::Arc};

use async_openai::config::OpenAIConfig;
use async_trait::async_trait;
use tracing::debug;

use common::{
    error::AppError,
    storage::{chunk::ScoredChunk, ChunkStore},
    utils::embedding::generate_embedding,
};

use crate::RankedChunk;

/// Query-time embedding access shared by the dense and hybrid retrievers.
pub struct EmbeddingProvider {
    client: Arc<async_openai::Client<OpenAIConfig>>,
    model: String,
    dimensions: u32,
}

impl EmbeddingProvider {
    pub fn new(
        client: Arc<async_openai::Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Self {
        Self {
            client,
            model,
            dimensions,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        generate_embedding(&self.client, text, &self.model, self.dimensions).await
    }
}

/// Candidate generation strategy. Every retriever returns at most `k`
/// chunks ordered best-first.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError>;
}

/// Order by retrieval score descending, breaking ties by
/// `(filename, page, chunk_id)` ascending so results are deterministic.
pub fn sort_ranked(chunks: &mut [RankedChunk]) {
    chunks.sort_by(|a, b| {
        b.retrieval_score
            .partial_cmp(&a.retrieval_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.sort_key().cmp(&b.chunk.sort_key()))
    });
}

fn into_ranked(hits: Vec<ScoredChunk>) -> Vec<RankedChunk> {
    hits.into_iter()
        .map(|hit| RankedChunk::new(hit.chunk, hit.score))
        .collect()
}

/// Dense vector retrieval with a minimum-similarity floor; candidates below
/// the floor are dropped rather than padded.
pub struct DenseRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<EmbeddingProvider>,
    min_similarity: f32,
}

impl DenseRetriever {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<EmbeddingProvider>,
        min_similarity: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            min_similarity,
        }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.store.dense_search(&embedding, k, None).await?;

        let before = hits.len();
        let mut ranked: Vec<RankedChunk> = into_ranked(hits)
            .into_iter()
            .filter(|candidate| candidate.retrieval_score >= self.min_similarity)
            .collect();
        sort_ranked(&mut ranked);

        debug!(
            candidates = before,
            kept = ranked.len(),
            threshold = self.min_similarity,
            "Dense retrieval completed"
        );
        Ok(ranked)
    }
}

/// Dense + keyword retrieval fused by the store with Reciprocal Rank
/// Fusion. RRF mass is not commensurable with cosine similarity, so no
/// score floor is applied here.
pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<EmbeddingProvider>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.store.hybrid_search(&embedding, query, k, None).await?;
        let mut ranked = into_ranked(hits);
        sort_ranked(&mut ranked);
        debug!(kept = ranked.len(), "Hybrid retrieval completed");
        Ok(ranked)
    }
}

/// Lexical-only retrieval. Not routed in production; exists for ablation
/// runs in the evaluation harness.
pub struct KeywordRetriever {
    store: Arc<dyn ChunkStore>,
}

impl KeywordRetriever {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError> {
        let hits = self.store.keyword_search(query, k, None).await?;
        let mut ranked = into_ranked(hits);
        sort_ranked(&mut ranked);
        Ok(ranked)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use common::storage::{chunk::Chunk, ChunkFilter};

    /// Fixed-response store used by retriever and pipeline tests.
    pub struct StaticStore {
        pub dense: Vec<ScoredChunk>,
        pub keyword: Vec<ScoredChunk>,
        pub hybrid: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl ChunkStore for StaticStore {
        async fn dense_search(
            &self,
            _embedding: &[f32],
            k: usize,
            _filter: Option<&ChunkFilter>,
        ) -> Result<Vec<ScoredChunk>, AppError> {
            Ok(self.dense.iter().take(k).cloned().collect())
        }

        async fn keyword_search(
            &self,
            _text: &str,
            k: usize,
            _filter: Option<&ChunkFilter>,
        ) -> Result<Vec<ScoredChunk>, AppError> {
            Ok(self.keyword.iter().take(k).cloned().collect())
        }

        async fn hybrid_search(
            &self,
            _embedding: &[f32],
            _text: &str,
            k: usize,
            _filter: Option<&ChunkFilter>,
        ) -> Result<Vec<ScoredChunk>, AppError> {
            Ok(self.hybrid.iter().take(k).cloned().collect())
        }
    }

    pub fn chunk(id: &str, filename: &str, page: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            filename: filename.to_string(),
            page: page.to_string(),
            ..Chunk::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::chunk, *};

    fn ranked(id: &str, score: f32) -> RankedChunk {
        RankedChunk::new(chunk(id, "doc.pdf", "1", "text"), score)
    }

    #[test]
    fn test_sort_ranked_orders_by_score_then_key() {
        let mut chunks = vec![
            RankedChunk::new(chunk("b", "b.pdf", "2", "t"), 0.5),
            RankedChunk::new(chunk("a", "a.pdf", "1", "t"), 0.5),
            ranked("c", 0.9),
        ];
        sort_ranked(&mut chunks);
        assert_eq!(chunks[0].chunk.id, "c");
        assert_eq!(chunks[1].chunk.id, "a");
        assert_eq!(chunks[2].chunk.id, "b");
    }

    #[tokio::test]
    async fn test_keyword_retriever_passes_through_store_order() {
        let store = Arc::new(test_support::StaticStore {
            dense: Vec::new(),
            keyword: vec![
                ScoredChunk {
                    chunk: chunk("1", "a.pdf", "1", "income limits"),
                    score: 0.8,
                },
                ScoredChunk {
                    chunk: chunk("2", "b.pdf", "3", "provider rates"),
                    score: 0.4,
                },
            ],
            hybrid: Vec::new(),
        });

        let retriever = KeywordRetriever::new(store);
        let results = retriever.search("income", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "1");
        assert!(results[0].rerank_score.is_none());
    }
}
