//! Weaviate vector index backend.
//!
//! Provides [`WeaviateIndex`] which implements [`VectorIndex`] over
//! Weaviate's REST readiness endpoint and GraphQL `Get` API using `reqwest`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::weaviate::WeaviateIndex;
//!
//! let index = WeaviateIndex::local();
//! let connection = index.connect().await?;
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::document::{Document, MetadataValue, ScoredDocument};
use crate::error::{QueryError, Result};
use crate::index::{IndexConnection, NearestQuery, VectorIndex};

const BACKEND: &str = "weaviate";

/// Default URL of a locally running Weaviate.
pub const DEFAULT_URL: &str = "http://localhost:8080";

/// A [`VectorIndex`] backed by [Weaviate](https://weaviate.io/).
///
/// Each Weaviate class is one collection. Similarity is Weaviate's
/// `certainty` when the class uses cosine distance, otherwise
/// `1 - distance`.
#[derive(Debug, Clone)]
pub struct WeaviateIndex {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl WeaviateIndex {
    /// Create an index handle for the Weaviate instance at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// An index handle for `http://localhost:8080`.
    pub fn local() -> Self {
        Self::new(DEFAULT_URL)
    }

    /// Read `WEAVIATE_URL` (default `http://localhost:8080`) and the optional
    /// `WEAVIATE_API_KEY`.
    pub fn from_env() -> Self {
        let url = std::env::var("WEAVIATE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let index = Self::new(url);
        match std::env::var("WEAVIATE_API_KEY") {
            Ok(key) if !key.is_empty() => index.with_api_key(key),
            _ => index,
        }
    }

    /// Authenticate with a bearer API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn authorize(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

#[async_trait]
impl VectorIndex for WeaviateIndex {
    async fn connect(&self) -> Result<Box<dyn IndexConnection>> {
        let ready_url = format!("{}/v1/.well-known/ready", self.url);
        let response = authorize(self.client.get(&ready_url), self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| {
                error!(backend = BACKEND, url = %self.url, error = %e, "weaviate unreachable");
                QueryError::ConnectionError {
                    backend: BACKEND.to_string(),
                    message: format!("{} unreachable: {e}", self.url),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!(backend = BACKEND, url = %self.url, %status, "weaviate not ready");
            return Err(QueryError::ConnectionError {
                backend: BACKEND.to_string(),
                message: format!("{} not ready: {status}", self.url),
            });
        }

        debug!(backend = BACKEND, url = %self.url, "opened weaviate session");
        Ok(Box::new(WeaviateConnection {
            client: self.client.clone(),
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            closed: false,
        }))
    }

    fn backend(&self) -> &str {
        BACKEND
    }
}

struct WeaviateConnection {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    closed: bool,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

fn retrieval_error(message: impl Into<String>) -> QueryError {
    QueryError::RetrievalError { backend: BACKEND.to_string(), message: message.into() }
}

/// GraphQL names must match `[_A-Za-z][_0-9A-Za-z]*`.
fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Build the `Get … nearVector` query for `query`.
fn near_vector_query(query: &NearestQuery<'_>) -> Result<String> {
    for (what, name) in [("collection", query.collection), ("content field", query.content_field)] {
        if !is_graphql_name(name) {
            return Err(QueryError::ConfigError(format!(
                "{what} '{name}' is not a valid Weaviate identifier"
            )));
        }
    }
    let vector = serde_json::to_string(query.vector)
        .map_err(|e| retrieval_error(format!("failed to encode query vector: {e}")))?;
    Ok(format!(
        "{{ Get {{ {collection}(nearVector: {{vector: {vector}}}, limit: {k}) \
         {{ {field} _additional {{ id distance certainty }} }} }} }}",
        collection = query.collection,
        field = query.content_field,
        k = query.k,
    ))
}

fn scalar(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => n.as_i64().map(MetadataValue::Int).or(n.as_f64().map(MetadataValue::Float)),
        Value::String(s) => Some(MetadataValue::Text(s.clone())),
        _ => None,
    }
}

/// Turn a GraphQL response into scored documents.
fn parse_hits(response: GraphQlResponse, query: &NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(retrieval_error(messages.join("; ")));
    }

    let objects = response
        .data
        .as_ref()
        .and_then(|data| data.get("Get"))
        .and_then(|get| get.get(query.collection))
        .ok_or_else(|| {
            retrieval_error(format!("collection '{}' does not exist", query.collection))
        })?;

    let Some(objects) = objects.as_array() else {
        // Weaviate answers `null` for a class with no objects.
        return Ok(Vec::new());
    };

    let mut hits = Vec::with_capacity(objects.len());
    for object in objects {
        let additional = object.get("_additional");
        let id = additional
            .and_then(|a| a.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| retrieval_error("object without _additional.id"))?
            .to_string();
        let certainty = additional.and_then(|a| a.get("certainty")).and_then(Value::as_f64);
        let distance = additional.and_then(|a| a.get("distance")).and_then(Value::as_f64);
        let score = match (certainty, distance) {
            (Some(c), _) => c,
            (None, Some(d)) => 1.0 - d,
            (None, None) => 0.0,
        } as f32;

        let content = object
            .get(query.content_field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut document = Document::new(id, content, query.collection);
        if let Some(fields) = object.as_object() {
            for (key, value) in fields {
                if key == query.content_field || key == "_additional" {
                    continue;
                }
                if let Some(value) = scalar(value) {
                    document.metadata.insert(key.clone(), value);
                }
            }
        }
        hits.push(ScoredDocument { document, score });
    }
    Ok(hits)
}

#[async_trait]
impl IndexConnection for WeaviateConnection {
    async fn nearest(&self, query: NearestQuery<'_>) -> Result<Vec<ScoredDocument>> {
        let graphql = near_vector_query(&query)?;
        let response = authorize(
            self.client.post(format!("{}/v1/graphql", self.url)),
            self.api_key.as_deref(),
        )
        .json(&json!({ "query": graphql }))
        .send()
        .await
        .map_err(|e| retrieval_error(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(retrieval_error(format!("GraphQL returned {status}: {body}")));
        }

        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| retrieval_error(format!("failed to parse response: {e}")))?;

        let hits = parse_hits(parsed, &query)?;
        debug!(backend = BACKEND, collection = query.collection, count = hits.len(), "weaviate search");
        Ok(hits)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        if !is_graphql_name(collection) {
            return Ok(false);
        }
        let schema_url = format!("{}/v1/schema/{collection}", self.url);
        let response = authorize(self.client.get(&schema_url), self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| QueryError::ConnectionError {
                backend: BACKEND.to_string(),
                message: format!("schema lookup failed: {e}"),
            })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(QueryError::ConnectionError {
                backend: BACKEND.to_string(),
                message: format!("schema lookup for '{collection}' returned {status}"),
            }),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(backend = BACKEND, url = %self.url, "closed weaviate session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query<'a>(vector: &'a [f32]) -> NearestQuery<'a> {
        NearestQuery { collection: "Document", content_field: "content", vector, k: 3 }
    }

    #[test]
    fn builds_near_vector_query() {
        let vector = [0.5, -1.0];
        let graphql = near_vector_query(&query(&vector)).unwrap();
        assert_eq!(
            graphql,
            "{ Get { Document(nearVector: {vector: [0.5,-1.0]}, limit: 3) \
             { content _additional { id distance certainty } } } }"
        );
    }

    #[test]
    fn rejects_identifiers_that_would_break_the_query() {
        let vector = [1.0];
        let mut q = query(&vector);
        q.collection = "Doc) { x }";
        assert!(matches!(near_vector_query(&q), Err(QueryError::ConfigError(_))));
    }

    #[test]
    fn parses_hits_with_certainty_and_metadata() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "data": { "Get": { "Document": [
                { "content": "Paris is the capital of France.", "page": 4,
                  "_additional": { "id": "1", "distance": 0.1, "certainty": 0.95 } },
                { "content": "Lyon", "_additional": { "id": "2", "distance": 0.4, "certainty": null } }
            ] } }
        }))
        .unwrap();

        let vector = [1.0];
        let hits = parse_hits(response, &query(&vector)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.content, "Paris is the capital of France.");
        assert!((hits[0].score - 0.95).abs() < 1e-6);
        assert_eq!(hits[0].document.metadata["page"], MetadataValue::Int(4));
        assert!((hits[1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn graphql_errors_are_retrieval_errors() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "errors": [{ "message": "Cannot query field \"Missing\" on type \"GetObjectsObj\"." }]
        }))
        .unwrap();
        let vector = [1.0];
        let err = parse_hits(response, &query(&vector)).unwrap_err();
        assert!(matches!(err, QueryError::RetrievalError { .. }));
    }

    #[test]
    fn null_class_result_is_empty() {
        let response: GraphQlResponse =
            serde_json::from_value(json!({ "data": { "Get": { "Document": null } } })).unwrap();
        let vector = [1.0];
        assert!(parse_hits(response, &query(&vector)).unwrap().is_empty());
    }
}
