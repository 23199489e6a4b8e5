//! Configuration for the query pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::Truncation;
use crate::error::{QueryError, Result};

/// Default collection queried when none is given.
pub const DEFAULT_COLLECTION: &str = "Document";
/// Default document attribute holding retrievable text.
pub const DEFAULT_CONTENT_FIELD: &str = "content";
/// Default number of documents to retrieve.
pub const DEFAULT_TOP_K: usize = 3;
/// Default context budget, in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Configuration parameters for the query pipeline.
///
/// Built once at process start and handed to
/// [`QueryPipelineBuilder::config`](crate::QueryPipelineBuilder::config).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    /// Which logical document set to query.
    pub collection_name: String,
    /// Which document attribute holds retrievable text.
    pub content_field: String,
    /// How many documents to retrieve.
    pub top_k: usize,
    /// Character cap passed to the context assembler.
    pub max_context_budget: usize,
    /// Expected embedding dimensionality. When set, the pipeline refuses an
    /// embedding provider that reports a different size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<usize>,
    /// Upper bound for each external call (embed, retrieve, generate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout: Option<Duration>,
    /// How an oversized first document is cut down to the budget.
    #[serde(default)]
    pub truncation: Truncation,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION.to_string(),
            content_field: DEFAULT_CONTENT_FIELD.to_string(),
            top_k: DEFAULT_TOP_K,
            max_context_budget: DEFAULT_MAX_CONTEXT_CHARS,
            embedding_dimensions: None,
            stage_timeout: None,
            truncation: Truncation::default(),
        }
    }
}

impl QueryConfig {
    /// Create a new builder for constructing a [`QueryConfig`].
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::default()
    }

    /// Load configuration from `RAG_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `RAG_COLLECTION` | `collection_name` |
    /// | `RAG_CONTENT_FIELD` | `content_field` |
    /// | `RAG_TOP_K` | `top_k` |
    /// | `RAG_MAX_CONTEXT_CHARS` | `max_context_budget` |
    /// | `RAG_EMBEDDING_DIMENSIONS` | `embedding_dimensions` |
    /// | `RAG_STAGE_TIMEOUT_SECS` | `stage_timeout` |
    /// | `RAG_TRUNCATION` | `truncation` (`boundary` or `word`) |
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConfigError`] if a variable is set but cannot be
    /// parsed, or if the resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = QueryConfig::builder();

        if let Some(name) = lookup("RAG_COLLECTION") {
            builder = builder.collection_name(name);
        }
        if let Some(field) = lookup("RAG_CONTENT_FIELD") {
            builder = builder.content_field(field);
        }
        if let Some(k) = parse_var::<usize>(&lookup, "RAG_TOP_K")? {
            builder = builder.top_k(k);
        }
        if let Some(budget) = parse_var::<usize>(&lookup, "RAG_MAX_CONTEXT_CHARS")? {
            builder = builder.max_context_budget(budget);
        }
        if let Some(dims) = parse_var::<usize>(&lookup, "RAG_EMBEDDING_DIMENSIONS")? {
            builder = builder.embedding_dimensions(dims);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "RAG_STAGE_TIMEOUT_SECS")? {
            builder = builder.stage_timeout(Duration::from_secs(secs));
        }
        if let Some(mode) = lookup("RAG_TRUNCATION") {
            let truncation = match mode.trim() {
                "boundary" => Truncation::Boundary,
                "word" => Truncation::WordBoundary,
                other => {
                    return Err(QueryError::ConfigError(format!(
                        "RAG_TRUNCATION must be 'boundary' or 'word', got '{other}'"
                    )));
                }
            };
            builder = builder.truncation(truncation);
        }

        builder.build()
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            QueryError::ConfigError(format!("{key} has an invalid value: '{raw}'"))
        }),
    }
}

/// Builder for constructing a validated [`QueryConfig`].
#[derive(Debug, Clone, Default)]
pub struct QueryConfigBuilder {
    config: QueryConfig,
}

impl QueryConfigBuilder {
    /// Set the collection to query.
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    /// Set the document attribute that holds retrievable text.
    pub fn content_field(mut self, field: impl Into<String>) -> Self {
        self.config.content_field = field.into();
        self
    }

    /// Set the number of documents to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the context budget in characters.
    pub fn max_context_budget(mut self, budget: usize) -> Self {
        self.config.max_context_budget = budget;
        self
    }

    /// Pin the embedding dimensionality shared by index and provider.
    pub fn embedding_dimensions(mut self, dims: usize) -> Self {
        self.config.embedding_dimensions = Some(dims);
        self
    }

    /// Bound each external call by `timeout`.
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.config.stage_timeout = Some(timeout);
        self
    }

    /// Choose how an oversized first document is truncated.
    pub fn truncation(mut self, truncation: Truncation) -> Self {
        self.config.truncation = truncation;
        self
    }

    /// Build the [`QueryConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConfigError`] if:
    /// - `top_k == 0`
    /// - `collection_name` or `content_field` is blank
    /// - `embedding_dimensions == Some(0)`
    /// - `stage_timeout` is zero
    pub fn build(self) -> Result<QueryConfig> {
        let config = self.config;
        if config.top_k == 0 {
            return Err(QueryError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if config.collection_name.trim().is_empty() {
            return Err(QueryError::ConfigError("collection_name must not be empty".to_string()));
        }
        if config.content_field.trim().is_empty() {
            return Err(QueryError::ConfigError("content_field must not be empty".to_string()));
        }
        if config.embedding_dimensions == Some(0) {
            return Err(QueryError::ConfigError(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if config.stage_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueryError::ConfigError("stage_timeout must be non-zero".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_the_document_collection() {
        let config = QueryConfig::default();
        assert_eq!(config.collection_name, "Document");
        assert_eq!(config.content_field, "content");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.truncation, Truncation::Boundary);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let err = QueryConfig::builder().top_k(0).build().unwrap_err();
        assert!(matches!(err, QueryError::ConfigError(_)));
    }

    #[test]
    fn blank_collection_is_rejected() {
        assert!(QueryConfig::builder().collection_name("  ").build().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(QueryConfig::builder().stage_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn reads_overrides_from_lookup() {
        let config = QueryConfig::from_lookup(lookup(&[
            ("RAG_COLLECTION", "Articles"),
            ("RAG_CONTENT_FIELD", "body"),
            ("RAG_TOP_K", "5"),
            ("RAG_MAX_CONTEXT_CHARS", "2000"),
            ("RAG_EMBEDDING_DIMENSIONS", "1536"),
            ("RAG_STAGE_TIMEOUT_SECS", "30"),
            ("RAG_TRUNCATION", "word"),
        ]))
        .unwrap();

        assert_eq!(config.collection_name, "Articles");
        assert_eq!(config.content_field, "body");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_context_budget, 2000);
        assert_eq!(config.embedding_dimensions, Some(1536));
        assert_eq!(config.stage_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.truncation, Truncation::WordBoundary);
    }

    #[test]
    fn unparseable_value_is_a_config_error() {
        let err = QueryConfig::from_lookup(lookup(&[("RAG_TOP_K", "three")])).unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));
    }

    #[test]
    fn zero_top_k_from_env_is_rejected() {
        assert!(QueryConfig::from_lookup(lookup(&[("RAG_TOP_K", "0")])).is_err());
    }
}
