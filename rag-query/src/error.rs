//! Error types for the `rag-query` crate.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// The pipeline stage an invocation was in when it stopped.
///
/// A query moves `Idle → Connecting → Embedding → Retrieving → Assembling →
/// Synthesizing → Closed`; `Failed` is reachable from every non-terminal
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Connecting,
    Embedding,
    Retrieving,
    Assembling,
    Synthesizing,
    Closed,
    Failed,
    /// Startup or request validation, outside of any single query run.
    Configuration,
}

impl Stage {
    /// Lowercase stage name used in logs and error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Connecting => "connecting",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Assembling => "assembling",
            Stage::Synthesizing => "synthesizing",
            Stage::Closed => "closed",
            Stage::Failed => "failed",
            Stage::Configuration => "configuration",
        }
    }

    /// Whether no further transition can happen from this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Closed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while answering a query.
///
/// Every variant is terminal for the query that produced it. The pipeline
/// releases its index connection before any of these reaches the caller.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The vector index backend was unreachable or rejected the session.
    #[error("Connection error ({backend}): {message}")]
    ConnectionError {
        /// The vector index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The query text could not be turned into an embedding.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The nearest-neighbor query failed or the collection does not exist.
    #[error("Retrieval error ({backend}): {message}")]
    RetrievalError {
        /// The vector index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The generative model failed or returned an unusable response.
    #[error("Synthesis error ({model}): {message}")]
    SynthesisError {
        /// The generative model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// Invalid configuration: bad `k`, dimensionality mismatch, malformed
    /// prompt template, missing collaborator.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl QueryError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            QueryError::ConnectionError { .. } => Stage::Connecting,
            QueryError::EmbeddingError { .. } => Stage::Embedding,
            QueryError::RetrievalError { .. } => Stage::Retrieving,
            QueryError::SynthesisError { .. } => Stage::Synthesizing,
            QueryError::ConfigError(_) => Stage::Configuration,
        }
    }

    /// Stable, machine-readable kind for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::ConnectionError { .. } => "connection",
            QueryError::EmbeddingError { .. } => "embedding",
            QueryError::RetrievalError { .. } => "retrieval",
            QueryError::SynthesisError { .. } => "synthesis",
            QueryError::ConfigError(_) => "configuration",
        }
    }

    /// Attribute a collaborator's error to `stage`.
    ///
    /// Errors already of the stage's kind, and configuration errors, pass
    /// through; anything else is re-wrapped so callers always see the kind
    /// of the stage that failed.
    pub(crate) fn at_stage(self, stage: Stage, source: &str) -> Self {
        if self.stage() == stage || matches!(self, QueryError::ConfigError(_)) {
            return self;
        }
        let message = self.to_string();
        match stage {
            Stage::Connecting => QueryError::ConnectionError { backend: source.to_string(), message },
            Stage::Embedding => QueryError::EmbeddingError { provider: source.to_string(), message },
            Stage::Retrieving => QueryError::RetrievalError { backend: source.to_string(), message },
            Stage::Synthesizing => QueryError::SynthesisError { model: source.to_string(), message },
            _ => self,
        }
    }

    /// Build the error kind a timed-out call at `stage` should surface as.
    pub(crate) fn timed_out(stage: Stage, source: &str, after: std::time::Duration) -> Self {
        let message = format!("timed out after {}ms", after.as_millis());
        match stage {
            Stage::Connecting => {
                QueryError::ConnectionError { backend: source.to_string(), message }
            }
            Stage::Embedding => QueryError::EmbeddingError { provider: source.to_string(), message },
            Stage::Retrieving => QueryError::RetrievalError { backend: source.to_string(), message },
            Stage::Synthesizing => QueryError::SynthesisError { model: source.to_string(), message },
            other => QueryError::ConfigError(format!("stage '{other}' {message}")),
        }
    }
}

/// A convenience result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_variant_reports_its_stage() {
        let err = QueryError::EmbeddingError { provider: "mock".into(), message: "down".into() };
        assert_eq!(err.stage(), Stage::Embedding);
        assert_eq!(err.kind(), "embedding");
        assert_eq!(err.to_string(), "Embedding error (mock): down");

        let err = QueryError::ConfigError("k must be positive".into());
        assert_eq!(err.stage(), Stage::Configuration);
    }

    #[test]
    fn timeout_maps_to_stage_error_kind() {
        let err = QueryError::timed_out(
            Stage::Synthesizing,
            "gpt",
            std::time::Duration::from_millis(250),
        );
        assert!(matches!(err, QueryError::SynthesisError { .. }));
        assert!(err.to_string().contains("250ms"));
    }
}
