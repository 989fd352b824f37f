use crate::RankedChunk;

/// Tunable sufficiency rule deciding whether vector retrieval alone is
/// good enough to answer from.
#[derive(Debug, Clone, Copy)]
pub struct WebFallbackPolicy {
    pub min_chunks: usize,
    pub min_score: f32,
}

impl WebFallbackPolicy {
    /// Vector results are sufficient when there are enough of them AND the
    /// judge was confident about at least one. Web calls cost money; when
    /// this holds, no web call may be made.
    pub fn is_sufficient(&self, reranked: &[RankedChunk]) -> bool {
        if reranked.len() < self.min_chunks {
            return false;
        }
        let best = reranked
            .iter()
            .filter_map(|chunk| chunk.rerank_score)
            .fold(0.0_f32, f32::max);
        best > self.min_score
    }
}

/// Merge vector and web candidates for a joint rerank pass. Vector chunks
/// come first so identity fallbacks still prefer corpus material.
pub fn merge_candidates(
    vector: Vec<RankedChunk>,
    web: Vec<RankedChunk>,
    cap: usize,
) -> Vec<RankedChunk> {
    let mut merged = vector;
    merged.extend(web.into_iter().take(cap));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrievers::test_support::chunk;

    fn reranked(id: &str, rerank_score: f32) -> RankedChunk {
        let mut candidate = RankedChunk::new(chunk(id, "doc.pdf", "1", "text"), 0.5);
        candidate.rerank_score = Some(rerank_score);
        candidate
    }

    fn policy() -> WebFallbackPolicy {
        WebFallbackPolicy {
            min_chunks: 3,
            min_score: 0.7,
        }
    }

    #[test]
    fn test_sufficient_when_count_and_confidence_met() {
        let chunks = vec![reranked("a", 0.9), reranked("b", 0.4), reranked("c", 0.2)];
        assert!(policy().is_sufficient(&chunks));
    }

    #[test]
    fn test_insufficient_when_too_few_chunks() {
        let chunks = vec![reranked("a", 0.95), reranked("b", 0.9)];
        assert!(!policy().is_sufficient(&chunks));
    }

    #[test]
    fn test_insufficient_when_confidence_low() {
        let chunks = vec![reranked("a", 0.7), reranked("b", 0.6), reranked("c", 0.5)];
        // max == threshold is not strictly greater, so still insufficient.
        assert!(!policy().is_sufficient(&chunks));
    }

    #[test]
    fn test_unjudged_chunks_never_count_as_confident() {
        let mut chunks = vec![reranked("a", 0.0), reranked("b", 0.0), reranked("c", 0.0)];
        for chunk in &mut chunks {
            chunk.rerank_score = None;
        }
        assert!(!policy().is_sufficient(&chunks));
    }

    #[test]
    fn test_thresholds_are_parameterizable() {
        let lax = WebFallbackPolicy {
            min_chunks: 1,
            min_score: 0.1,
        };
        let chunks = vec![reranked("a", 0.2)];
        assert!(lax.is_sufficient(&chunks));
        assert!(!policy().is_sufficient(&chunks));
    }

    #[test]
    fn test_merge_caps_web_results_and_keeps_vector_first() {
        let vector = vec![reranked("v1", 0.5)];
        let web = vec![reranked("w1", 0.0), reranked("w2", 0.0), reranked("w3", 0.0)];
        let merged = merge_candidates(vector, web, 2);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].chunk.id, "v1");
        assert_eq!(merged[2].chunk.id, "w2");
    }
}
