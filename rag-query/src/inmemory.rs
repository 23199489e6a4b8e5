//! In-memory vector index using cosine similarity.
//!
//! This module provides [`InMemoryVectorIndex`], a dependency-free backend
//! holding documents and their embeddings in a `HashMap` behind a
//! `tokio::sync::RwLock`. It is suitable for development, tests, and small
//! fixed corpora. It also keeps count of connections opened and closed,
//! which makes it handy for checking connection hygiene.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Document, ScoredDocument, rank_order};
use crate::error::{QueryError, Result};
use crate::index::{IndexConnection, NearestQuery, VectorIndex};

const BACKEND: &str = "InMemory";

/// A document stored together with its embedding.
#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    embedding: Vec<f32>,
}

type Collections = HashMap<String, HashMap<String, StoredDocument>>;

#[derive(Debug, Default)]
struct SessionStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    refuse: AtomicBool,
}

/// An in-memory vector index using cosine similarity for search.
///
/// Collections are stored as nested `HashMap`s: collection name → document
/// ID → document. Cloning the index shares the underlying storage.
///
/// # Example
///
/// ```rust,ignore
/// use rag_query::{Document, InMemoryVectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.create_collection("Document").await;
/// index.insert(Document::new("1", "Paris is the capital of France.", "Document"), vec![1.0, 0.0]).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    collections: Arc<RwLock<Collections>>,
    stats: Arc<SessionStats>,
}

impl InMemoryVectorIndex {
    /// Create a new empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named collection. No-op if it already exists.
    pub async fn create_collection(&self, name: &str) {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
    }

    /// Store `document` with its precomputed `embedding` in the document's
    /// collection, replacing any document with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::RetrievalError`] if the collection does not exist.
    pub async fn insert(&self, document: Document, embedding: Vec<f32>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = document.collection_name.clone();
        let store = collections.get_mut(&collection).ok_or_else(|| missing(&collection))?;
        store.insert(document.id.clone(), StoredDocument { document, embedding });
        Ok(())
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed so far.
    pub fn connections_closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections_opened().saturating_sub(self.connections_closed())
    }

    /// Make subsequent [`connect`](VectorIndex::connect) calls fail, as an
    /// unreachable backend would.
    pub fn refuse_connections(&self, refuse: bool) {
        self.stats.refuse.store(refuse, Ordering::SeqCst);
    }
}

fn missing(collection: &str) -> QueryError {
    QueryError::RetrievalError {
        backend: BACKEND.to_string(),
        message: format!("collection '{collection}' does not exist"),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn connect(&self) -> Result<Box<dyn IndexConnection>> {
        if self.stats.refuse.load(Ordering::SeqCst) {
            return Err(QueryError::ConnectionError {
                backend: BACKEND.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        debug!(backend = BACKEND, "opened in-memory session");
        Ok(Box::new(InMemoryConnection {
            collections: self.collections.clone(),
            stats: self.stats.clone(),
        }))
    }

    fn backend(&self) -> &str {
        BACKEND
    }
}

struct InMemoryConnection {
    collections: Arc<RwLock<Collections>>,
    stats: Arc<SessionStats>,
}

#[async_trait]
impl IndexConnection for InMemoryConnection {
    async fn nearest(&self, query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().await;
        let store = collections.get(query.collection).ok_or_else(|| missing(query.collection))?;

        let mut scored: Vec<ScoredDocument> = store
            .values()
            .map(|stored| ScoredDocument {
                document: stored.document.clone(),
                score: cosine_similarity(&stored.embedding, query.vector),
            })
            .collect();

        // Ties at the cut must not depend on HashMap iteration order.
        scored.sort_by(rank_order);
        scored.truncate(query.k);
        Ok(scored)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    fn close(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}
