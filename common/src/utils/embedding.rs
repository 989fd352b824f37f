use async_openai::types::CreateEmbeddingRequestArgs;
use tracing::debug;

use crate::error::AppError;

/// Generates an embedding vector for a query string.
///
/// Used only at query time; the corpus itself is embedded offline and read
/// from the chunk store.
pub async fn generate_embedding(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::ProviderParse("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(dimensions = embedding.len(), "Generated query embedding");

    Ok(embedding)
}
