use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use common::{
    error::AppError,
    storage::chunk::{Chunk, SourceType},
};

use crate::RankedChunk;

use super::Retriever;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    content: String,
    #[serde(default)]
    score: Option<f32>,
}

/// Live web search used by the fallback handler. Results are mapped into
/// synthetic chunks (`filename` = page title, `page` = "web") so the rest
/// of the pipeline treats them like any other candidate.
pub struct WebSearchRetriever {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WebSearchRetriever {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn to_ranked(results: Vec<SearchResult>) -> Vec<RankedChunk> {
        results
            .into_iter()
            .enumerate()
            .filter(|(_, result)| !result.content.trim().is_empty())
            .map(|(rank, result)| {
                let score = result
                    .score
                    .unwrap_or_else(|| 1.0 / (rank as f32 + 1.0));
                RankedChunk::new(
                    Chunk {
                        id: format!("web-{rank}"),
                        text: result.content,
                        filename: result.title,
                        page: "web".to_string(),
                        source_url: result.url,
                        source_type: SourceType::Web,
                        ..Chunk::default()
                    },
                    score,
                )
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for WebSearchRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError> {
        let mut body = json!({
            "query": query,
            "max_results": k,
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }

        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("web search failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "web search returned {status}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderParse(format!("web search reply unparsable: {e}")))?;

        let ranked = Self::to_ranked(parsed.results);
        debug!(results = ranked.len(), "Web search completed");
        Ok(ranked)
    }
}
