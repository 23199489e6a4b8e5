//! Query pipeline orchestrator.
//!
//! The [`QueryPipeline`] answers one question by composing a
//! [`VectorIndex`], an [`EmbeddingProvider`], a [`Retriever`], a
//! [`ContextAssembler`] and an [`AnswerSynthesizer`]:
//!
//! ```text
//! connect → embed → retrieve → assemble → synthesize → close
//! ```
//!
//! The index connection opened in the first step is owned by a
//! [`ConnectionGuard`] for the rest of the run, so it is closed exactly once
//! whichever step fails, and also when the caller drops the future.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{QueryPipeline, QueryConfig, InMemoryVectorIndex};
//!
//! let pipeline = QueryPipeline::builder()
//!     .config(QueryConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new()))
//!     .generator(Arc::new(my_model))
//!     .build()?;
//!
//! let answer = pipeline.answer_query("What is the capital of France?").await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::QueryConfig;
use crate::context::ContextAssembler;
use crate::document::{Answer, RetrievalResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{QueryError, Result, Stage};
use crate::index::{ConnectionGuard, VectorIndex};
use crate::retriever::Retriever;
use crate::synthesis::{AnswerSynthesizer, Generator, PromptTemplate};

/// One incoming question plus optional per-call overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The question text.
    pub text: String,
    /// Overrides the configured `top_k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    /// Overrides the configured collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Return the documents the answer was grounded on.
    #[serde(default)]
    pub return_sources: bool,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), k: None, collection: None, return_sources: false }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_sources(mut self) -> Self {
        self.return_sources = true;
        self
    }
}

/// Tracks where a single invocation is in its state machine.
struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self { current: Stage::Idle }
    }

    fn enter(&mut self, next: Stage) {
        debug!(from = %self.current, to = %next, "stage transition");
        self.current = next;
    }

    fn fail(&mut self, err: QueryError) -> QueryError {
        error!(stage = %self.current, kind = err.kind(), error = %err, "query failed");
        self.current = Stage::Failed;
        err
    }
}

/// The query pipeline orchestrator.
///
/// Stateless between calls and safe to share behind an `Arc`; every
/// invocation opens and closes its own index connection. Construct one via
/// [`QueryPipeline::builder()`].
pub struct QueryPipeline {
    config: QueryConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<dyn VectorIndex>,
    retriever: Retriever,
    assembler: ContextAssembler,
    synthesizer: AnswerSynthesizer,
}

impl QueryPipeline {
    /// Create a new [`QueryPipelineBuilder`].
    pub fn builder() -> QueryPipelineBuilder {
        QueryPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Answer `text` with the configured collection and `top_k`.
    ///
    /// # Errors
    ///
    /// Returns the [`QueryError`] of the stage that failed. The index
    /// connection has been closed by the time the error is returned.
    pub async fn answer_query(&self, text: &str) -> Result<Answer> {
        self.answer(QueryRequest::new(text)).await
    }

    /// Answer a [`QueryRequest`].
    ///
    /// An empty retrieval result is not an error: the model is still asked,
    /// with an empty context.
    ///
    /// # Errors
    ///
    /// - [`QueryError::ConfigError`] for an invalid `k` or an embedding of the
    ///   wrong dimensionality
    /// - [`QueryError::ConnectionError`] if the index cannot be reached
    /// - [`QueryError::EmbeddingError`] if the question cannot be embedded
    /// - [`QueryError::RetrievalError`] if the collection is missing or the
    ///   search fails
    /// - [`QueryError::SynthesisError`] if the model fails or answers nothing
    pub async fn answer(&self, request: QueryRequest) -> Result<Answer> {
        let span = self.span(&request);
        self.run(request).instrument(span).await
    }

    /// Run only the connect → embed → retrieve half of the pipeline.
    ///
    /// # Errors
    ///
    /// Same as [`answer`](Self::answer), minus synthesis.
    pub async fn retrieve(&self, request: QueryRequest) -> Result<RetrievalResult> {
        let span = self.span(&request);
        async {
            let mut tracker = StageTracker::new();
            let (guard, result) = self.connect_and_retrieve(&request, &mut tracker).await?;
            guard.close();
            tracker.enter(Stage::Closed);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Check once at startup that the index is reachable and holds the
    /// configured collection.
    ///
    /// # Errors
    ///
    /// - [`QueryError::ConnectionError`] if the index cannot be reached
    /// - [`QueryError::ConfigError`] if the configured collection does not
    ///   exist
    pub async fn verify(&self) -> Result<()> {
        let backend = self.vector_index.backend().to_string();
        let collection = self.config.collection_name.as_str();

        let connection = self
            .vector_index
            .connect()
            .await
            .map_err(|e| e.at_stage(Stage::Connecting, &backend))?;
        let guard = ConnectionGuard::new(connection, backend.as_str());
        let exists = guard
            .connection()
            .has_collection(collection)
            .await
            .map_err(|e| e.at_stage(Stage::Connecting, &backend))?;
        guard.close();

        if !exists {
            error!(backend = %backend, collection, "configured collection does not exist");
            return Err(QueryError::ConfigError(format!(
                "collection '{collection}' does not exist on backend '{backend}'"
            )));
        }
        info!(backend = %backend, collection, "vector index ready");
        Ok(())
    }

    fn span(&self, request: &QueryRequest) -> tracing::Span {
        let query_id = Uuid::new_v4();
        let collection = request.collection.as_deref().unwrap_or(&self.config.collection_name);
        let k = request.k.unwrap_or(self.config.top_k);
        info_span!("rag_query", %query_id, collection, k)
    }

    async fn run(&self, request: QueryRequest) -> Result<Answer> {
        let mut tracker = StageTracker::new();
        let (guard, result) = self.connect_and_retrieve(&request, &mut tracker).await?;

        tracker.enter(Stage::Assembling);
        let context = self.assembler.assemble(&result, self.config.max_context_budget);
        if result.is_empty() {
            warn!("no documents retrieved, answering without context");
        }
        debug!(
            documents_used = context.documents_used(),
            context_chars = context.len(),
            truncated = context.is_truncated(),
            "assembled context"
        );

        tracker.enter(Stage::Synthesizing);
        let model = self.synthesizer.model_name().to_string();
        let mut answer = self
            .bounded(Stage::Synthesizing, &model, self.synthesizer.synthesize(&request.text, &context))
            .await
            .map_err(|e| tracker.fail(e.at_stage(Stage::Synthesizing, &model)))?;

        guard.close();
        tracker.enter(Stage::Closed);

        info!(
            retrieved = result.len(),
            documents_used = context.documents_used(),
            answer_chars = answer.text.chars().count(),
            "query answered"
        );

        if request.return_sources {
            answer.source_documents = Some(result.into_documents());
        }
        Ok(answer)
    }

    /// Steps 1–3. On success the caller owns the open connection's guard.
    async fn connect_and_retrieve(
        &self,
        request: &QueryRequest,
        tracker: &mut StageTracker,
    ) -> Result<(ConnectionGuard, RetrievalResult)> {
        let k = request.k.unwrap_or(self.config.top_k);
        if k == 0 {
            return Err(tracker.fail(QueryError::ConfigError(
                "k must be a positive integer".to_string(),
            )));
        }
        let collection =
            request.collection.as_deref().unwrap_or(&self.config.collection_name).to_string();

        tracker.enter(Stage::Connecting);
        let backend = self.vector_index.backend().to_string();
        let connection = self
            .vector_index
            .connect()
            .await
            .map_err(|e| tracker.fail(e.at_stage(Stage::Connecting, &backend)))?;
        let guard = ConnectionGuard::new(connection, backend.as_str());

        tracker.enter(Stage::Embedding);
        let provider = self.embedding_provider.name().to_string();
        let vector = self
            .bounded(Stage::Embedding, &provider, self.embedding_provider.embed(&request.text))
            .await
            .map_err(|e| tracker.fail(e.at_stage(Stage::Embedding, &provider)))?;

        tracker.enter(Stage::Retrieving);
        let result = self
            .bounded(
                Stage::Retrieving,
                &backend,
                self.retriever.retrieve(guard.connection(), &collection, &vector, k),
            )
            .await
            .map_err(|e| tracker.fail(e.at_stage(Stage::Retrieving, &backend)))?;

        Ok((guard, result))
    }

    /// Await `call`, bounded by the configured stage timeout if any.
    async fn bounded<T>(
        &self,
        stage: Stage,
        source: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| QueryError::timed_out(stage, source, limit))?,
            None => call.await,
        }
    }
}

/// Builder for constructing a [`QueryPipeline`].
///
/// `config`, `embedding_provider`, `vector_index` and `generator` are
/// required; `prompt_template` defaults to
/// [`DEFAULT_TEMPLATE`](crate::synthesis::DEFAULT_TEMPLATE).
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = QueryPipeline::builder()
///     .config(QueryConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .vector_index(Arc::new(index))
///     .generator(Arc::new(model))
///     .prompt_template(PromptTemplate::new("{context}\n\nQ: {question}\nA:")?)  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct QueryPipelineBuilder {
    config: Option<QueryConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    generator: Option<Arc<dyn Generator>>,
    prompt_template: Option<PromptTemplate>,
}

impl QueryPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector index backend.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Set the generative model.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the default question-answering prompt.
    pub fn prompt_template(mut self, template: PromptTemplate) -> Self {
        self.prompt_template = Some(template);
        self
    }

    /// Build the [`QueryPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConfigError`] if any required field is missing or
    /// the embedding provider's dimensionality differs from
    /// `config.embedding_dimensions`.
    pub fn build(self) -> Result<QueryPipeline> {
        let config =
            self.config.ok_or_else(|| QueryError::ConfigError("config is required".to_string()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| QueryError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_index = self
            .vector_index
            .ok_or_else(|| QueryError::ConfigError("vector_index is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| QueryError::ConfigError("generator is required".to_string()))?;

        let dimensions = embedding_provider.dimensions();
        if let Some(expected) = config.embedding_dimensions {
            if expected != dimensions {
                return Err(QueryError::ConfigError(format!(
                    "embedding provider '{}' produces {dimensions} dimensions, configuration expects {expected}",
                    embedding_provider.name()
                )));
            }
        }

        let retriever = Retriever::new(vector_index.backend(), config.content_field.as_str())
            .with_dimensions(dimensions);
        let assembler = ContextAssembler::new(config.truncation);
        let mut synthesizer = AnswerSynthesizer::new(generator);
        if let Some(template) = self.prompt_template {
            synthesizer = synthesizer.with_template(template);
        }

        Ok(QueryPipeline {
            config,
            embedding_provider,
            vector_index,
            retriever,
            assembler,
            synthesizer,
        })
    }
}
