//! Vector index capability: sessions and nearest-neighbor search.
//!
//! A [`VectorIndex`] hands out one [`IndexConnection`] per query. The
//! pipeline never holds a raw connection; it wraps each one in a
//! [`ConnectionGuard`] which closes it exactly once, either explicitly on the
//! success path or from `Drop` on every other exit (errors, early returns,
//! a cancelled future).

use async_trait::async_trait;
use tracing::debug;

use crate::document::ScoredDocument;
use crate::error::Result;

/// Parameters of a single nearest-neighbor query.
#[derive(Debug, Clone, Copy)]
pub struct NearestQuery<'a> {
    /// The logical document set to search.
    pub collection: &'a str,
    /// The document attribute that holds retrievable text.
    pub content_field: &'a str,
    /// The query embedding.
    pub vector: &'a [f32],
    /// Maximum number of documents to return.
    pub k: usize,
}

/// A backend that stores documents with embeddings and opens sessions on them.
///
/// # Example
///
/// ```rust,ignore
/// use rag_query::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// let connection = index.connect().await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Open a session to the backend.
    ///
    /// Fails with [`QueryError::ConnectionError`](crate::QueryError::ConnectionError)
    /// if the backend is unreachable or rejects the session.
    async fn connect(&self) -> Result<Box<dyn IndexConnection>>;

    /// Backend name for logs and error context.
    fn backend(&self) -> &str;
}

/// One live session to a vector index.
///
/// Exclusively owned by the query that opened it; never shared across
/// concurrent queries and never retained past that query.
#[async_trait]
pub trait IndexConnection: Send + Sync {
    /// Return up to `query.k` documents most similar to `query.vector`.
    ///
    /// Ordering is the backend's; callers re-rank. A missing collection is a
    /// [`QueryError::RetrievalError`](crate::QueryError::RetrievalError); an
    /// empty one yields an empty vector.
    async fn nearest(&self, query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>>;

    /// Whether `collection` exists on the backend. Used to check the
    /// configured collection once at startup.
    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Release the session. Called exactly once per connection.
    fn close(&mut self);
}

/// Scoped ownership of an [`IndexConnection`].
///
/// Dropping the guard closes the connection unless [`close`](Self::close)
/// already did.
pub struct ConnectionGuard {
    connection: Box<dyn IndexConnection>,
    backend: String,
    closed: bool,
}

impl ConnectionGuard {
    pub fn new(connection: Box<dyn IndexConnection>, backend: impl Into<String>) -> Self {
        Self { connection, backend: backend.into(), closed: false }
    }

    /// Borrow the guarded connection.
    pub fn connection(&self) -> &dyn IndexConnection {
        self.connection.as_ref()
    }

    /// Close the connection now.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connection.close();
            debug!(backend = %self.backend, "index connection closed");
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("backend", &self.backend)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IndexConnection for CountingConnection {
        async fn nearest(&self, _query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
            Ok(Vec::new())
        }

        async fn has_collection(&self, _collection: &str) -> Result<bool> {
            Ok(true)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn guard(closes: &Arc<AtomicUsize>) -> ConnectionGuard {
        ConnectionGuard::new(Box::new(CountingConnection { closes: closes.clone() }), "test")
    }

    #[test]
    fn explicit_close_does_not_close_again_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        guard(&closes).close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _guard = guard(&closes);
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
