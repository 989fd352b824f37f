use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use common::{error::AppError, storage::chunk::Chunk};

use crate::RankedChunk;

use super::{sort_ranked, Retriever};

#[derive(Debug, Deserialize)]
struct ManagedResponse {
    #[serde(default)]
    documents: Vec<ManagedDocument>,
}

#[derive(Debug, Deserialize)]
struct ManagedDocument {
    #[serde(default)]
    id: String,
    excerpt: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    page: Option<serde_json::Value>,
    #[serde(default)]
    score: f32,
}

/// Adapter for a managed search service. The service applies its own ML
/// ranking, but its output still flows through the LLM reranker downstream
/// so all retrieval modes are judged the same way.
pub struct ManagedRetriever {
    http: reqwest::Client,
    base_url: String,
}

impl ManagedRetriever {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn to_ranked(documents: Vec<ManagedDocument>) -> Vec<RankedChunk> {
        let mut ranked: Vec<RankedChunk> = documents
            .into_iter()
            .filter(|doc| !doc.excerpt.trim().is_empty())
            .map(|doc| {
                let page = match doc.page {
                    Some(serde_json::Value::Number(n)) => n.to_string(),
                    Some(serde_json::Value::String(s)) => s,
                    _ => "N/A".to_string(),
                };
                RankedChunk::new(
                    Chunk {
                        id: doc.id,
                        text: doc.excerpt,
                        filename: doc.title,
                        page,
                        source_url: doc.uri,
                        ..Chunk::default()
                    },
                    doc.score,
                )
            })
            .collect();
        sort_ranked(&mut ranked);
        ranked
    }
}

#[async_trait]
impl Retriever for ManagedRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, AppError> {
        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .json(&json!({"query": query, "page_size": k}))
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("managed search failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "managed search returned {status}"
            )));
        }

        let parsed: ManagedResponse = response.json().await.map_err(|e| {
            AppError::ProviderParse(format!("managed search reply unparsable: {e}"))
        })?;

        let mut ranked = Self::to_ranked(parsed.documents);
        ranked.truncate(k);
        debug!(results = ranked.len(), "Managed search completed");
        Ok(ranked)
    }
}
