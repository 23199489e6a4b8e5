//! Top-k retrieval over an open index connection.

use tracing::{debug, error};

use crate::document::RetrievalResult;
use crate::error::{QueryError, Result};
use crate::index::{IndexConnection, NearestQuery};

/// Runs nearest-neighbor queries and puts the results into rank order.
///
/// Similarity and ranking are the backend's; the retriever only adds a
/// stable order (score descending, ties by ascending id) and the `k` bound.
#[derive(Debug, Clone)]
pub struct Retriever {
    backend: String,
    content_field: String,
    dimensions: Option<usize>,
}

impl Retriever {
    pub fn new(backend: impl Into<String>, content_field: impl Into<String>) -> Self {
        Self { backend: backend.into(), content_field: content_field.into(), dimensions: None }
    }

    /// Reject query vectors whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Retrieve at most `k` documents from `collection` nearest to `vector`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::ConfigError`] if `k == 0` or the vector has the wrong
    ///   dimensionality.
    /// - [`QueryError::RetrievalError`] if the collection does not exist or
    ///   the backend call fails.
    pub async fn retrieve(
        &self,
        connection: &dyn IndexConnection,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(QueryError::ConfigError("k must be a positive integer".to_string()));
        }
        match self.dimensions {
            Some(expected) if vector.len() != expected => {
                return Err(QueryError::ConfigError(format!(
                    "query embedding has {} dimensions, index expects {expected}",
                    vector.len()
                )));
            }
            _ => {}
        }

        let query =
            NearestQuery { collection, content_field: &self.content_field, vector, k };
        let hits = connection.nearest(query).await.map_err(|e| {
            error!(backend = %self.backend, collection, error = %e, "nearest-neighbor query failed");
            match e {
                QueryError::RetrievalError { .. } | QueryError::ConfigError(_) => e,
                other => QueryError::RetrievalError {
                    backend: self.backend.clone(),
                    message: other.to_string(),
                },
            }
        })?;

        let result = RetrievalResult::ranked(hits, k);
        debug!(backend = %self.backend, collection, k, returned = result.len(), "retrieved documents");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::document::{Document, ScoredDocument};

    struct FixedConnection {
        hits: Vec<ScoredDocument>,
    }

    #[async_trait]
    impl IndexConnection for FixedConnection {
        async fn nearest(&self, query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
            if query.collection != "Document" {
                return Err(QueryError::RetrievalError {
                    backend: "fixed".into(),
                    message: format!("collection '{}' does not exist", query.collection),
                });
            }
            Ok(self.hits.clone())
        }

        async fn has_collection(&self, collection: &str) -> Result<bool> {
            Ok(collection == "Document")
        }

        fn close(&mut self) {}
    }

    fn hit(id: &str, score: f32) -> ScoredDocument {
        ScoredDocument { document: Document::new(id, format!("content {id}"), "Document"), score }
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let connection = FixedConnection { hits: vec![hit("5", 0.80), hit("2", 0.80)] };
        let retriever = Retriever::new("fixed", "content");
        let result = retriever.retrieve(&connection, "Document", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(result.ids(), vec!["2", "5"]);
    }

    #[tokio::test]
    async fn truncates_oversized_backend_answers() {
        let connection = FixedConnection {
            hits: vec![hit("1", 0.1), hit("2", 0.9), hit("3", 0.5), hit("4", 0.7)],
        };
        let retriever = Retriever::new("fixed", "content");
        let result = retriever.retrieve(&connection, "Document", &[1.0], 2).await.unwrap();
        assert_eq!(result.ids(), vec!["2", "4"]);
    }

    #[tokio::test]
    async fn zero_k_is_a_config_error() {
        let connection = FixedConnection { hits: vec![] };
        let retriever = Retriever::new("fixed", "content");
        let err = retriever.retrieve(&connection, "Document", &[1.0], 0).await.unwrap_err();
        assert!(matches!(err, QueryError::ConfigError(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_config_error() {
        let connection = FixedConnection { hits: vec![] };
        let retriever = Retriever::new("fixed", "content").with_dimensions(3);
        let err = retriever.retrieve(&connection, "Document", &[1.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, QueryError::ConfigError(_)));
    }

    #[tokio::test]
    async fn missing_collection_is_a_retrieval_error() {
        let connection = FixedConnection { hits: vec![] };
        let retriever = Retriever::new("fixed", "content");
        let err = retriever.retrieve(&connection, "Nope", &[1.0], 1).await.unwrap_err();
        assert!(matches!(err, QueryError::RetrievalError { .. }));
    }

    #[tokio::test]
    async fn empty_collection_is_not_an_error() {
        let connection = FixedConnection { hits: vec![] };
        let retriever = Retriever::new("fixed", "content");
        let result = retriever.retrieve(&connection, "Document", &[1.0], 3).await.unwrap();
        assert!(result.is_empty());
    }
}
