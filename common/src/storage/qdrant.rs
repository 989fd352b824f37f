use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::AppError;

use super::{
    chunk::{Chunk, ScoredChunk},
    ChunkFilter, ChunkStore, RRF_C,
};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Read-only client for a Qdrant collection holding the indexed corpus.
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantStore {
    pub fn new(base_url: &str, api_key: Option<String>, collection: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection: collection.to_string(),
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, AppError> {
        let url = format!("{}/collections/{}/{path}", self.base_url, self.collection);

        let mut attempt: u32 = 0;
        loop {
            let mut request = self.http.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("api-key", key);
            }

            let outcome: Result<Value, String> = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            AppError::Store(format!("invalid JSON from chunk store: {e}"))
                        });
                    }
                    if status.is_server_error() {
                        Err(format!("chunk store returned {status}"))
                    } else {
                        // 4xx is a persistent error; retrying cannot help.
                        let detail = response.text().await.unwrap_or_default();
                        return Err(AppError::Store(format!(
                            "chunk store rejected request ({status}): {detail}"
                        )));
                    }
                }
                Err(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                    Err(format!("chunk store unreachable: {err}"))
                }
                Err(err) => return Err(AppError::Store(err.to_string())),
            };

            if let Err(reason) = outcome {
                attempt = attempt.saturating_add(1);
                if attempt >= MAX_ATTEMPTS {
                    return Err(AppError::UpstreamUnavailable(reason));
                }
                let delay = INITIAL_BACKOFF * 2_u32.saturating_pow(attempt.saturating_sub(1));
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "Retrying chunk store request"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn filter_to_conditions(filter: &ChunkFilter) -> Value {
        let mut must = Vec::new();
        if let Some(filename) = &filter.filename_eq {
            must.push(json!({"key": "filename", "match": {"value": filename}}));
        }
        if let Some(fragment) = &filter.filename_contains {
            must.push(json!({"key": "filename", "match": {"text": fragment}}));
        }
        if let Some(fragment) = &filter.text_contains {
            must.push(json!({"key": "text", "match": {"text": fragment}}));
        }
        json!({ "must": must })
    }

    fn parse_search_hits(response: &Value) -> Result<Vec<ScoredChunk>, AppError> {
        let hits = response
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Store("missing `result` array in store response".into()))?;

        hits.iter().map(Self::parse_hit).collect()
    }

    fn parse_scroll_points(response: &Value) -> Result<Vec<Chunk>, AppError> {
        let points = response
            .get("result")
            .and_then(|result| result.get("points"))
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Store("missing `result.points` in store response".into()))?;

        points
            .iter()
            .map(|point| Self::parse_hit(point).map(|scored| scored.chunk))
            .collect()
    }

    fn parse_hit(hit: &Value) -> Result<ScoredChunk, AppError> {
        let payload = hit
            .get("payload")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut chunk: Chunk = serde_json::from_value(payload)
            .map_err(|e| AppError::Store(format!("chunk payload failed validation: {e}")))?;
        if chunk.text.is_empty() {
            return Err(AppError::Store(
                "chunk payload has empty `text` field".into(),
            ));
        }

        if chunk.id.is_empty() {
            chunk.id = match hit.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
        }

        let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        Ok(ScoredChunk { chunk, score })
    }
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn dense_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let mut body = json!({
            "vector": embedding,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Self::filter_to_conditions(filter);
        }

        let response = self.post_json("points/search", body).await?;
        let hits = Self::parse_search_hits(&response)?;
        debug!(hits = hits.len(), k, "Dense search completed");
        Ok(hits)
    }

    async fn keyword_search(
        &self,
        text: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        // The collection keeps a full-text index on `text`; scroll the
        // matches and score locally by term overlap, since scroll results
        // carry no server-side score.
        let mut merged = match filter.filter(|f| !f.is_empty()) {
            Some(filter) => Self::filter_to_conditions(filter),
            None => json!({"must": []}),
        };
        if let Some(must) = merged.get_mut("must").and_then(Value::as_array_mut) {
            must.push(json!({"key": "text", "match": {"text": text}}));
        }

        let body = json!({
            "filter": merged,
            "limit": k,
            "with_payload": true,
        });

        let response = self.post_json("points/scroll", body).await?;
        let chunks = Self::parse_scroll_points(&response)?;

        let mut scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .map(|chunk| {
                let score = lexical_overlap(text, &chunk.text);
                ScoredChunk { chunk, score }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.sort_key().cmp(&b.chunk.sort_key()))
        });
        scored.truncate(k);
        debug!(hits = scored.len(), k, "Keyword search completed");
        Ok(scored)
    }

    async fn hybrid_search(
        &self,
        embedding: &[f32],
        text: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let (dense, keyword) = tokio::try_join!(
            self.dense_search(embedding, k, filter),
            self.keyword_search(text, k, filter),
        )?;

        let mut fused = super::rrf_fuse(&[dense, keyword], RRF_C);
        fused.truncate(k);
        debug!(hits = fused.len(), k, "Hybrid search completed");
        Ok(fused)
    }
}

/// Fraction of query terms present in the candidate text.
fn lexical_overlap(query: &str, text: &str) -> f32 {
    let haystack = text.to_ascii_lowercase();
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(|term| term.trim().to_ascii_lowercase())
        .filter(|term| term.len() >= 3)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matches = terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();
    matches as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hit_uses_point_id_when_payload_has_none() {
        let hit = json!({
            "id": 42,
            "score": 0.83,
            "payload": {
                "text": "Eligibility is determined by family income.",
                "filename": "ccs-handbook.pdf",
                "page": 12
            }
        });
        let scored = QdrantStore::parse_hit(&hit).unwrap();
        assert_eq!(scored.chunk.id, "42");
        assert_eq!(scored.chunk.page, "12");
        assert!((scored.score - 0.83).abs() < 1e-6);
    }

    #[test]
    fn test_parse_hit_rejects_empty_text() {
        let hit = json!({
            "id": "abc",
            "score": 0.5,
            "payload": {"text": "", "filename": "x.pdf", "page": 1}
        });
        assert!(matches!(
            QdrantStore::parse_hit(&hit),
            Err(AppError::Store(_))
        ));
    }

    #[test]
    fn test_filter_conditions_combine() {
        let filter = ChunkFilter {
            filename_eq: Some("bcy-26-psoc-chart.pdf".into()),
            filename_contains: None,
            text_contains: Some("45% SMI".into()),
        };
        let conditions = QdrantStore::filter_to_conditions(&filter);
        let must = conditions["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
    }

    #[test]
    fn test_lexical_overlap_scores_partial_matches() {
        let score = lexical_overlap(
            "income eligibility limit",
            "The income limit depends on family size.",
        );
        assert!(score > 0.5 && score < 1.0);
        assert!((lexical_overlap("", "anything")).abs() < f32::EPSILON);
    }
}
