//! Qdrant vector index backend.
//!
//! Provides [`QdrantIndex`] which implements [`VectorIndex`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::qdrant::QdrantIndex;
//!
//! let index = QdrantIndex::new("http://localhost:6334")?;
//! let connection = index.connect().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{CollectionExistsRequest, SearchPointsBuilder, Value as QdrantValue};
use tracing::debug;

use crate::document::{Document, MetadataValue, ScoredDocument};
use crate::error::{QueryError, Result};
use crate::index::{IndexConnection, NearestQuery, VectorIndex};

const BACKEND: &str = "qdrant";

/// A [`VectorIndex`] backed by [Qdrant](https://qdrant.tech/).
///
/// Each Qdrant collection is one document collection; the document text is
/// read from the payload key named by the configured content field, and the
/// remaining scalar payload keys become metadata.
pub struct QdrantIndex {
    client: Arc<Qdrant>,
}

impl QdrantIndex {
    /// Create a Qdrant index handle for the given URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(connection_error)?;
        Ok(Self { client: Arc::new(client) })
    }

    /// Create a handle with an API key.
    pub fn with_api_key(url: &str, api_key: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).api_key(api_key).build().map_err(connection_error)?;
        Ok(Self { client: Arc::new(client) })
    }

    /// Create a handle for the default URL (`http://localhost:6334`).
    pub fn default_url() -> Result<Self> {
        Self::new("http://localhost:6334")
    }

    /// Create a handle from an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client: Arc::new(client) }
    }
}

fn connection_error(e: qdrant_client::QdrantError) -> QueryError {
    QueryError::ConnectionError { backend: BACKEND.to_string(), message: e.to_string() }
}

fn retrieval_error(e: qdrant_client::QdrantError) -> QueryError {
    QueryError::RetrievalError { backend: BACKEND.to_string(), message: e.to_string() }
}

/// Convert a scalar Qdrant payload value.
fn scalar(value: &QdrantValue) -> Option<MetadataValue> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(MetadataValue::Text(s.clone())),
        Some(Kind::IntegerValue(i)) => Some(MetadataValue::Int(*i)),
        Some(Kind::DoubleValue(d)) => Some(MetadataValue::Float(*d)),
        Some(Kind::BoolValue(b)) => Some(MetadataValue::Bool(*b)),
        _ => None,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn connect(&self) -> Result<Box<dyn IndexConnection>> {
        self.client.health_check().await.map_err(connection_error)?;
        debug!(backend = BACKEND, "opened qdrant session");
        Ok(Box::new(QdrantConnection { client: self.client.clone() }))
    }

    fn backend(&self) -> &str {
        BACKEND
    }
}

struct QdrantConnection {
    client: Arc<Qdrant>,
}

#[async_trait]
impl IndexConnection for QdrantConnection {
    async fn nearest(&self, query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(query.collection, query.vector.to_vec(), query.k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(retrieval_error)?;

        let results: Vec<ScoredDocument> = response
            .result
            .into_iter()
            .map(|scored| {
                let id = scored
                    .id
                    .as_ref()
                    .and_then(|pid| match &pid.point_id_options {
                        Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
                        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
                        None => None,
                    })
                    .unwrap_or_default();

                let mut content = String::new();
                let mut document = Document::new(id, String::new(), query.collection);
                for (key, value) in &scored.payload {
                    if key == query.content_field {
                        if let Some(Kind::StringValue(s)) = &value.kind {
                            content = s.clone();
                        }
                    } else if let Some(value) = scalar(value) {
                        document.metadata.insert(key.clone(), value);
                    }
                }
                document.content = content;

                ScoredDocument { document, score: scored.score }
            })
            .collect();

        debug!(backend = BACKEND, collection = query.collection, count = results.len(), "qdrant search");
        Ok(results)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        self.client
            .collection_exists(CollectionExistsRequest { collection_name: collection.to_string() })
            .await
            .map_err(connection_error)
    }

    fn close(&mut self) {
        debug!(backend = BACKEND, "closed qdrant session");
    }
}
