use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rag_query::{Document, QueryError, QueryRequest};
use serde::{Deserialize, Serialize};

/// Body of `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBody {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub return_sources: bool,
}

impl From<QueryBody> for QueryRequest {
    fn from(body: QueryBody) -> Self {
        QueryRequest {
            text: body.question,
            k: body.k,
            collection: body.collection,
            return_sources: body.return_sources,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<Document>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// A failed request, rendered as an [`ErrorBody`].
#[derive(Debug)]
pub enum ApiError {
    BlankQuestion,
    /// The request asked for something no pipeline could serve.
    InvalidRequest(String),
    Query(QueryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BlankQuestion => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // Request problems are caught before the pipeline runs, so a
            // configuration error here is the server's own.
            ApiError::Query(err) => match err {
                QueryError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                QueryError::ConnectionError { .. } => StatusCode::SERVICE_UNAVAILABLE,
                QueryError::EmbeddingError { .. }
                | QueryError::RetrievalError { .. }
                | QueryError::SynthesisError { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn detail(&self) -> ErrorDetail {
        match self {
            ApiError::BlankQuestion => ErrorDetail {
                kind: "validation".to_string(),
                stage: "idle".to_string(),
                message: "question must not be blank".to_string(),
            },
            ApiError::InvalidRequest(message) => ErrorDetail {
                kind: "validation".to_string(),
                stage: "idle".to_string(),
                message: message.clone(),
            },
            ApiError::Query(err) => ErrorDetail {
                kind: err.kind().to_string(),
                stage: err.stage().to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl QueryBody {
    /// Reject requests the pipeline would refuse for reasons of their own.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.question.trim().is_empty() {
            return Err(ApiError::BlankQuestion);
        }
        if self.k == Some(0) {
            return Err(ApiError::InvalidRequest("k must be a positive integer".to_string()));
        }
        if self.collection.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ApiError::InvalidRequest("collection must not be blank".to_string()));
        }
        Ok(())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.detail() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (
                QueryError::ConfigError("query embedding has 3 dimensions".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                QueryError::ConnectionError { backend: "weaviate".into(), message: "down".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                QueryError::EmbeddingError { provider: "OpenAI".into(), message: "429".into() },
                StatusCode::BAD_GATEWAY,
            ),
            (
                QueryError::RetrievalError { backend: "weaviate".into(), message: "x".into() },
                StatusCode::BAD_GATEWAY,
            ),
            (
                QueryError::SynthesisError { model: "gpt-4o-mini".into(), message: "x".into() },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::BlankQuestion.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::InvalidRequest("k".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validation_rejects_client_mistakes() {
        let body = |json: &str| serde_json::from_str::<QueryBody>(json).unwrap();

        assert!(matches!(body(r#"{"question":" "}"#).validate(), Err(ApiError::BlankQuestion)));
        assert!(matches!(
            body(r#"{"question":"Why?","k":0}"#).validate(),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            body(r#"{"question":"Why?","collection":""}"#).validate(),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(body(r#"{"question":"Why?","k":2,"collection":"Document"}"#).validate().is_ok());
    }

    #[test]
    fn detail_carries_kind_and_stage() {
        let err = ApiError::from(QueryError::EmbeddingError {
            provider: "OpenAI".into(),
            message: "quota".into(),
        });
        let detail = err.detail();
        assert_eq!(detail.kind, "embedding");
        assert_eq!(detail.stage, "embedding");
        assert!(detail.message.contains("quota"));
    }

    #[test]
    fn body_defaults_optional_fields() {
        let body: QueryBody = serde_json::from_str(r#"{"question":"Why?"}"#).unwrap();
        let request = QueryRequest::from(body);
        assert_eq!(request.text, "Why?");
        assert_eq!(request.k, None);
        assert!(!request.return_sources);
    }
}
