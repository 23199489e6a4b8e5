//! Embedding provider trait for turning query text into vectors.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding backend (OpenAI, Azure OpenAI,
/// a local model) behind a unified async interface. The pipeline calls
/// [`embed`](EmbeddingProvider::embed) once per query and never retries;
/// retry policy belongs to the provider or to the caller.
///
/// # Example
///
/// ```rust,ignore
/// use rag_query::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("capital of France").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    ///
    /// Fails with [`QueryError::EmbeddingError`](crate::QueryError::EmbeddingError)
    /// on provider unavailability, quota exhaustion, or malformed input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Human-readable provider name for logs and error context.
    fn name(&self) -> &str {
        "embedding"
    }
}
