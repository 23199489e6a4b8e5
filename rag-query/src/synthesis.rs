//! Answer synthesis: one prompt, one generative-model call.
//!
//! Prompt construction ([`PromptTemplate::render`]) is pure so it can be
//! tested without a model. [`AnswerSynthesizer`] renders the prompt, calls
//! the [`Generator`] exactly once, and rejects empty responses. There is no
//! looping or self-correction: all context goes into a single call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::context::AssembledContext;
use crate::document::Answer;
use crate::error::{QueryError, Result};

/// A generative model that turns a prompt into text.
///
/// # Example
///
/// ```rust,ignore
/// use rag_query::Generator;
///
/// let text = generator.generate("Question: 2+2?\nHelpful Answer:").await?;
/// ```
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a completion for `prompt`.
    ///
    /// Fails with [`QueryError::SynthesisError`] when the model call errors.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model name for logs and error context.
    fn name(&self) -> &str {
        "generator"
    }
}

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

/// The default "stuff" question-answering prompt.
pub const DEFAULT_TEMPLATE: &str = "Use the following pieces of context to answer the question \
at the end. If you don't know the answer, just say that you don't know, don't try to make up an \
answer.\n\n{context}\n\nQuestion: {question}\nHelpful Answer:";

/// A prompt template with `{context}` and `{question}` slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { template: DEFAULT_TEMPLATE.to_string() }
    }
}

impl PromptTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConfigError`] unless both `{context}` and
    /// `{question}` appear.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for slot in [CONTEXT_SLOT, QUESTION_SLOT] {
            if !template.contains(slot) {
                return Err(QueryError::ConfigError(format!(
                    "prompt template is missing the {slot} placeholder"
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill the slots. Substituted text is never re-scanned for placeholders.
    pub fn render(&self, question: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + question.len() + context.len());
        let mut rest = self.template.as_str();
        loop {
            let next = [(CONTEXT_SLOT, context), (QUESTION_SLOT, question.trim())]
                .into_iter()
                .filter_map(|(slot, value)| rest.find(slot).map(|at| (at, slot, value)))
                .min_by_key(|(at, _, _)| *at);
            match next {
                Some((at, slot, value)) => {
                    out.push_str(&rest[..at]);
                    out.push_str(value);
                    rest = &rest[at + slot.len()..];
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        }
        out
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PromptTemplate> for String {
    fn from(value: PromptTemplate) -> Self {
        value.template
    }
}

/// Combines question and context into one prompt and asks the model.
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator, template: PromptTemplate::default() }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn model_name(&self) -> &str {
        self.generator.name()
    }

    /// Build the prompt that [`synthesize`](Self::synthesize) would send.
    pub fn prompt(&self, question: &str, context: &AssembledContext) -> String {
        self.template.render(question, context.as_str())
    }

    /// Generate an answer to `question` grounded in `context`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::SynthesisError`] if the model call fails or the
    /// response is empty.
    pub async fn synthesize(&self, question: &str, context: &AssembledContext) -> Result<Answer> {
        let prompt = self.prompt(question, context);
        let model = self.generator.name().to_string();
        debug!(model = %model, prompt_chars = prompt.chars().count(), "calling generative model");

        let raw = self.generator.generate(&prompt).await.map_err(|e| {
            error!(model = %model, error = %e, "generative model call failed");
            match e {
                QueryError::SynthesisError { .. } => e,
                other => QueryError::SynthesisError { model: model.clone(), message: other.to_string() },
            }
        })?;

        let text = raw.trim();
        if text.is_empty() {
            error!(model = %model, "generative model returned an empty response");
            return Err(QueryError::SynthesisError {
                model,
                message: "model returned an empty response".to_string(),
            });
        }

        Ok(Answer { text: text.to_string(), source_documents: None })
    }
}
