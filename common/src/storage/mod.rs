pub mod chunk;
pub mod qdrant;

use async_trait::async_trait;

use crate::error::AppError;
use chunk::ScoredChunk;

/// Constant for Reciprocal Rank Fusion.
pub const RRF_C: f32 = 60.0;

/// Equality / substring conditions accepted by the chunk store. Used by
/// entity-extraction callers; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub filename_eq: Option<String>,
    pub filename_contains: Option<String>,
    pub text_contains: Option<String>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.filename_eq.is_none()
            && self.filename_contains.is_none()
            && self.text_contains.is_none()
    }
}

/// Read-only access to the indexed corpus.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Nearest-neighbor search by cosine similarity, best match first.
    async fn dense_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError>;

    /// Lexical search; the score is implementation-defined.
    async fn keyword_search(
        &self,
        text: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError>;

    /// Dense + keyword candidates fused with Reciprocal Rank Fusion.
    async fn hybrid_search(
        &self,
        embedding: &[f32],
        text: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError>;
}

/// Fuse ranked candidate lists with Reciprocal Rank Fusion:
/// `fused(d) = Σᵢ 1/(c + rankᵢ(d))` over the lists that contain `d`.
/// Input lists must already be ordered best-first.
pub fn rrf_fuse(lists: &[Vec<ScoredChunk>], c: f32) -> Vec<ScoredChunk> {
    use std::collections::HashMap;

    let mut fused: HashMap<String, ScoredChunk> = HashMap::new();
    for list in lists {
        for (rank, candidate) in list.iter().enumerate() {
            let contribution = 1.0 / (c + rank as f32 + 1.0);
            fused
                .entry(candidate.chunk.id.clone())
                .and_modify(|existing| existing.score += contribution)
                .or_insert_with(|| ScoredChunk {
                    chunk: candidate.chunk.clone(),
                    score: contribution,
                });
        }
    }

    let mut merged: Vec<ScoredChunk> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.sort_key().cmp(&b.chunk.sort_key()))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk::Chunk;

    fn scored(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                text: format!("text for {id}"),
                filename: "doc.pdf".to_string(),
                page: "1".to_string(),
                ..Chunk::default()
            },
            score,
        }
    }

    #[test]
    fn test_rrf_rewards_presence_in_both_lists() {
        let dense = vec![scored("a", 0.9), scored("b", 0.8), scored("c", 0.7)];
        let keyword = vec![scored("b", 5.0), scored("d", 4.0)];

        let fused = rrf_fuse(&[dense, keyword], RRF_C);

        // "b" appears in both lists so it must outrank everything else.
        assert_eq!(fused[0].chunk.id, "b");
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_rrf_single_list_preserves_order() {
        let dense = vec![scored("a", 0.9), scored("b", 0.8)];
        let fused = rrf_fuse(&[dense], RRF_C);
        assert_eq!(fused[0].chunk.id, "a");
        assert_eq!(fused[1].chunk.id, "b");
    }

    #[test]
    fn test_chunk_filter_is_empty() {
        assert!(ChunkFilter::default().is_empty());
        let filter = ChunkFilter {
            filename_contains: Some("bcy-26".to_string()),
            ..ChunkFilter::default()
        };
        assert!(!filter.is_empty());
    }
}
