//! OpenAI and Azure OpenAI providers: embeddings and chat completions.
//!
//! This module is only available when the `openai` feature is enabled.
//!
//! Both providers speak to either the public OpenAI API (bearer auth,
//! model chosen per request) or an Azure OpenAI resource (an `api-key`
//! header, model fixed by the deployment, `api-version` query parameter).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{QueryError, Result};
use crate::synthesis::Generator;

/// The default OpenAI API base.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// The default chat model.
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Where requests go and how they authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAIEndpoint {
    /// The OpenAI API or an OpenAI-compatible server.
    OpenAI { api_key: String, base_url: String },
    /// An Azure OpenAI deployment.
    Azure { endpoint: String, api_key: String, deployment: String, api_version: String },
}

impl OpenAIEndpoint {
    /// Full URL for `operation` (`embeddings` or `chat/completions`).
    fn url(&self, operation: &str) -> String {
        match self {
            OpenAIEndpoint::OpenAI { base_url, .. } => {
                format!("{}/{operation}", base_url.trim_end_matches('/'))
            }
            OpenAIEndpoint::Azure { endpoint, deployment, api_version, .. } => format!(
                "{}/openai/deployments/{deployment}/{operation}?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            OpenAIEndpoint::OpenAI { api_key, .. } => request.bearer_auth(api_key),
            OpenAIEndpoint::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }

    fn provider(&self) -> &'static str {
        match self {
            OpenAIEndpoint::OpenAI { .. } => "OpenAI",
            OpenAIEndpoint::Azure { .. } => "AzureOpenAI",
        }
    }

    fn is_azure(&self) -> bool {
        matches!(self, OpenAIEndpoint::Azure { .. })
    }

    fn azure_from_env(deployment_var: &str, version_var: &str) -> std::result::Result<Self, String> {
        let var = |key: &str| std::env::var(key).map_err(|_| format!("{key} environment variable not set"));
        let endpoint = OpenAIEndpoint::Azure {
            endpoint: var("AZURE_OPENAI_ENDPOINT")?,
            api_key: var("AZURE_OPENAI_API_KEY")?,
            deployment: var(deployment_var)?,
            api_version: var(version_var)?,
        };
        Ok(endpoint)
    }
}

/// Send a JSON request and decode a JSON response, turning transport,
/// status, and decoding failures into messages for the caller's error kind.
async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    endpoint: &OpenAIEndpoint,
    operation: &str,
    body: &Req,
) -> std::result::Result<Resp, String> {
    let provider = endpoint.provider();
    let response = endpoint
        .authorize(client.post(endpoint.url(operation)))
        .json(body)
        .send()
        .await
        .map_err(|e| {
            error!(provider, operation, error = %e, "request failed");
            format!("request failed: {e}")
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
        error!(provider, operation, %status, "API error");
        return Err(format!("API returned {status}: {detail}"));
    }

    response.json::<Resp>().await.map_err(|e| {
        error!(provider, operation, error = %e, "failed to parse response");
        format!("failed to parse response: {e}")
    })
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the OpenAI or Azure OpenAI embeddings API.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small` (ignored by Azure, where
///   the deployment fixes the model).
/// - `dimensions` – optional Matryoshka dimension override.
///
/// # Example
///
/// ```rust,ignore
/// use rag_query::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::azure_from_env()?;
/// let embedding = provider.embed("capital of France").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    endpoint: OpenAIEndpoint,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for the public OpenAI API.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(embedding_error("OpenAI", "API key must not be empty"));
        }
        Ok(Self::with_endpoint(OpenAIEndpoint::OpenAI {
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
        }))
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| embedding_error("OpenAI", "OPENAI_API_KEY environment variable not set"))?;
        Self::new(api_key)
    }

    /// Create a provider for an Azure OpenAI embedding deployment.
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self::with_endpoint(OpenAIEndpoint::Azure {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
        })
    }

    /// Create an Azure provider from `AZURE_OPENAI_ENDPOINT`,
    /// `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_EMBEDDING_DEPLOYMENT_MODEL` and
    /// `AZURE_OPENAI_EMBEDDING_DEPLOYMENT_API_VERSION`.
    pub fn azure_from_env() -> Result<Self> {
        let endpoint = OpenAIEndpoint::azure_from_env(
            "AZURE_OPENAI_EMBEDDING_DEPLOYMENT_MODEL",
            "AZURE_OPENAI_EMBEDDING_DEPLOYMENT_API_VERSION",
        )
        .map_err(|message| embedding_error("AzureOpenAI", &message))?;
        Ok(Self::with_endpoint(endpoint))
    }

    /// Create a provider for an explicit endpoint.
    pub fn with_endpoint(endpoint: OpenAIEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    ///
    /// When set, the API returns embeddings truncated to this size.
    /// This also updates the value returned by [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Declare the deployment's native dimensionality without asking the API
    /// to truncate.
    pub fn with_native_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self
    }
}

fn embedding_error(provider: &str, message: &str) -> QueryError {
    QueryError::EmbeddingError { provider: provider.into(), message: message.into() }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self.endpoint.provider();
        debug!(provider, text_len = text.len(), model = %self.model, "embedding query text");

        let request_body = EmbeddingRequest {
            model: (!self.endpoint.is_azure()).then_some(self.model.as_str()),
            input: vec![text],
            dimensions: self.request_dimensions,
        };

        let response: EmbeddingResponse =
            post_json(&self.client, &self.endpoint, "embeddings", &request_body)
                .await
                .map_err(|message| embedding_error(provider, &message))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| embedding_error(provider, "API returned empty response"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        self.endpoint.provider()
    }
}

// ── Chat completions ───────────────────────────────────────────────

/// A [`Generator`] backed by the OpenAI or Azure OpenAI chat completions API.
///
/// The prompt is sent as a single user message; the first choice's content
/// is the answer.
pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    endpoint: OpenAIEndpoint,
    model: String,
    temperature: Option<f32>,
}

impl OpenAIChatGenerator {
    /// Create a generator for the public OpenAI API.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(synthesis_error("OpenAI", "API key must not be empty"));
        }
        Ok(Self::with_endpoint(OpenAIEndpoint::OpenAI {
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
        }))
    }

    /// Create a generator using `OPENAI_API_KEY` and, if set, `OPENAI_CHAT_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| synthesis_error("OpenAI", "OPENAI_API_KEY environment variable not set"))?;
        let generator = Self::new(api_key)?;
        Ok(match std::env::var("OPENAI_CHAT_MODEL") {
            Ok(model) => generator.with_model(model),
            Err(_) => generator,
        })
    }

    /// Create a generator for an Azure OpenAI chat deployment.
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        Self::with_endpoint(OpenAIEndpoint::Azure {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: deployment.clone(),
            api_version: api_version.into(),
        })
        .with_model(deployment)
    }

    /// Create an Azure generator from `AZURE_OPENAI_ENDPOINT`,
    /// `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_LLM_DEPLOYMENT_MODEL` and
    /// `AZURE_OPENAI_LLM_DEPLOYMENT_API_VERSION`.
    pub fn azure_from_env() -> Result<Self> {
        let endpoint = OpenAIEndpoint::azure_from_env(
            "AZURE_OPENAI_LLM_DEPLOYMENT_MODEL",
            "AZURE_OPENAI_LLM_DEPLOYMENT_API_VERSION",
        )
        .map_err(|message| synthesis_error("AzureOpenAI", &message))?;
        let model = match &endpoint {
            OpenAIEndpoint::Azure { deployment, .. } => deployment.clone(),
            OpenAIEndpoint::OpenAI { .. } => DEFAULT_CHAT_MODEL.to_string(),
        };
        Ok(Self::with_endpoint(endpoint).with_model(model))
    }

    /// Create a generator for an explicit endpoint.
    pub fn with_endpoint(endpoint: OpenAIEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model: DEFAULT_CHAT_MODEL.into(),
            temperature: None,
        }
    }

    /// Set the chat model (deployment name on Azure).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

fn synthesis_error(model: &str, message: &str) -> QueryError {
    QueryError::SynthesisError { model: model.into(), message: message.into() }
}

#[async_trait]
impl Generator for OpenAIChatGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(provider = self.endpoint.provider(), model = %self.model, prompt_len = prompt.len(), "chat completion");

        let request_body = ChatRequest {
            model: (!self.endpoint.is_azure()).then_some(self.model.as_str()),
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };

        let response: ChatResponse =
            post_json(&self.client, &self.endpoint, "chat/completions", &request_body)
                .await
                .map_err(|message| synthesis_error(&self.model, &message))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| synthesis_error(&self.model, "API returned no choices"))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_urls_join_base_and_operation() {
        let endpoint = OpenAIEndpoint::OpenAI {
            api_key: "sk-test".into(),
            base_url: "https://api.openai.com/v1/".into(),
        };
        assert_eq!(endpoint.url("embeddings"), "https://api.openai.com/v1/embeddings");
        assert_eq!(endpoint.url("chat/completions"), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn azure_urls_name_the_deployment_and_version() {
        let endpoint = OpenAIEndpoint::Azure {
            endpoint: "https://example.openai.azure.com/".into(),
            api_key: "key".into(),
            deployment: "text-embedding-3-large".into(),
            api_version: "2024-02-01".into(),
        };
        assert_eq!(
            endpoint.url("embeddings"),
            "https://example.openai.azure.com/openai/deployments/text-embedding-3-large/embeddings?api-version=2024-02-01"
        );
    }

    #[test]
    fn azure_requests_omit_the_model() {
        let body = EmbeddingRequest { model: None, input: vec!["q"], dimensions: None };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"input":["q"]}"#);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(OpenAIEmbeddingProvider::new("").is_err());
        assert!(OpenAIChatGenerator::new("").is_err());
    }

    #[test]
    fn chat_reply_without_content_is_tolerated_by_decoder() {
        let reply: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(reply.choices[0].message.content.is_none());
    }
}
