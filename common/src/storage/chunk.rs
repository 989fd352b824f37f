use serde::{Deserialize, Deserializer, Serialize};

/// Where a chunk came from: the indexed corpus or a live web search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Document,
    Web,
}

/// A retrievable text unit with provenance metadata, as stored in the
/// external index. Context enrichment fields exist only for embedding-time
/// use and are never rendered to users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub id: String,
    pub text: String,
    pub filename: String,
    #[serde(deserialize_with = "page_from_value", default = "default_page")]
    pub page: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub has_context: Option<bool>,
    #[serde(default)]
    pub master_context: Option<String>,
    #[serde(default)]
    pub document_context: Option<String>,
    #[serde(default)]
    pub chunk_context: Option<String>,
    #[serde(default, skip_serializing_if = "is_document")]
    pub source_type: SourceType,
}

fn is_document(source_type: &SourceType) -> bool {
    *source_type == SourceType::Document
}

fn default_page() -> String {
    "N/A".to_string()
}

/// The store writes `page` as either an integer or a string ("N/A" for
/// pages that could not be attributed); normalize both to a string.
fn page_from_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PageRepr {
        Number(i64),
        Text(String),
    }

    Ok(match PageRepr::deserialize(deserializer)? {
        PageRepr::Number(n) => n.to_string(),
        PageRepr::Text(s) => s,
    })
}

impl Chunk {
    /// Deterministic ordering key used to break score ties.
    pub fn sort_key(&self) -> (&str, &str, &str) {
        (&self.filename, &self.page, &self.id)
    }

    pub fn is_web(&self) -> bool {
        self.source_type == SourceType::Web
    }
}

/// A chunk paired with the score assigned by one retrieval signal.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
