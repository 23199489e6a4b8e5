//! # rag-query
//!
//! Query-time retrieval-augmented generation.
//!
//! Given a question, the [`QueryPipeline`] opens a session on a vector
//! index, embeds the question, retrieves the top-k nearest documents,
//! assembles them into a bounded context, and asks a generative model for an
//! answer grounded in that context. The index session is released on every
//! exit path.
//!
//! The three external capabilities are traits so that real services and
//! deterministic test doubles are interchangeable:
//!
//! - [`EmbeddingProvider`]: text → vector
//! - [`VectorIndex`] / [`IndexConnection`]: sessions and nearest-neighbor search
//! - [`Generator`]: prompt → text
//!
//! ## Features
//!
//! - `openai`: OpenAI and Azure OpenAI embeddings and chat completions
//! - `weaviate`: Weaviate vector index over REST/GraphQL
//! - `qdrant`: Qdrant vector index over gRPC
//! - `full`: all of the above
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rag_query::{InMemoryVectorIndex, QueryConfig, QueryPipeline};
//!
//! let pipeline = QueryPipeline::builder()
//!     .config(QueryConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new()))
//!     .generator(Arc::new(model))
//!     .build()?;
//!
//! let answer = pipeline.answer_query("What is the capital of France?").await?;
//! println!("{}", answer.text);
//! ```

pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod inmemory;
pub mod pipeline;
pub mod retriever;
pub mod synthesis;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "qdrant")]
pub mod qdrant;

#[cfg(feature = "weaviate")]
pub mod weaviate;

pub use config::{QueryConfig, QueryConfigBuilder};
pub use context::{AssembledContext, ContextAssembler, Truncation};
pub use document::{Answer, Document, MetadataValue, RetrievalResult, ScoredDocument};
pub use embedding::EmbeddingProvider;
pub use error::{QueryError, Result, Stage};
pub use index::{ConnectionGuard, IndexConnection, NearestQuery, VectorIndex};
pub use inmemory::InMemoryVectorIndex;
pub use pipeline::{QueryPipeline, QueryPipelineBuilder, QueryRequest};
pub use retriever::Retriever;
pub use synthesis::{AnswerSynthesizer, Generator, PromptTemplate};
