use std::sync::Arc;

use anyhow::Context;
use rag_query::openai::{OpenAIChatGenerator, OpenAIEmbeddingProvider};
use rag_query::weaviate::WeaviateIndex;
use rag_query::{EmbeddingProvider, Generator, QueryConfig, QueryPipeline};
use rag_query_server::server::{AppState, ServerConfig, run_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment may already be complete.
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let server = ServerConfig::from_env()?;
    let pipeline = pipeline_from_env().context("failed to configure the query pipeline")?;
    pipeline.verify().await.context("vector index is not ready for queries")?;

    run_server(server, AppState::new(pipeline)).await
}

/// Azure OpenAI when `AZURE_OPENAI_ENDPOINT` is set, the public OpenAI API
/// otherwise; Weaviate from `WEAVIATE_URL`.
fn pipeline_from_env() -> anyhow::Result<QueryPipeline> {
    let config = QueryConfig::from_env()?;
    let azure = std::env::var("AZURE_OPENAI_ENDPOINT").is_ok_and(|v| !v.is_empty());

    let (embedder, generator): (Arc<dyn EmbeddingProvider>, Arc<dyn Generator>) = if azure {
        let dims = azure_embedding_dimensions(&config)?;
        let embedder = OpenAIEmbeddingProvider::azure_from_env()?.with_native_dimensions(dims);
        (Arc::new(embedder), Arc::new(OpenAIChatGenerator::azure_from_env()?))
    } else {
        let mut embedder = OpenAIEmbeddingProvider::from_env()?;
        if let Some(dims) = config.embedding_dimensions {
            embedder = embedder.with_dimensions(dims);
        }
        (Arc::new(embedder), Arc::new(OpenAIChatGenerator::from_env()?))
    };

    let index = WeaviateIndex::from_env();
    info!(
        weaviate = index.url(),
        embedder = embedder.name(),
        generator = generator.name(),
        collection = %config.collection_name,
        top_k = config.top_k,
        "query pipeline configured"
    );

    Ok(QueryPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_index(Arc::new(index))
        .generator(generator)
        .build()?)
}

/// Output size of the Azure embedding deployment. Never defaulted.
fn azure_embedding_dimensions(config: &QueryConfig) -> anyhow::Result<usize> {
    config.embedding_dimensions.ok_or_else(|| {
        anyhow::anyhow!(
            "RAG_EMBEDDING_DIMENSIONS must be set when using Azure OpenAI \
             (e.g. 1536 for text-embedding-ada-002, 3072 for text-embedding-3-large)"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_requires_explicit_dimensions() {
        let err = azure_embedding_dimensions(&QueryConfig::default()).unwrap_err();
        assert!(err.to_string().contains("RAG_EMBEDDING_DIMENSIONS"));

        let config = QueryConfig::builder().embedding_dimensions(3072).build().unwrap();
        assert_eq!(azure_embedding_dimensions(&config).unwrap(), 3072);
    }
}
