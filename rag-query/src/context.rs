//! Context assembly: ranked documents in, bounded prompt context out.
//!
//! [`ContextAssembler::assemble`] is a pure function. It walks a
//! [`RetrievalResult`] in rank order and joins document contents with a
//! fixed separator, stopping before the first document that would push the
//! context past its budget. Lower-ranked documents are therefore dropped
//! first, and a document is only ever cut when it is the top-ranked one and
//! alone exceeds the budget.
//!
//! Budgets are counted in characters (Unicode scalar values); a character is
//! never split.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::RetrievalResult;

/// Separator placed between consecutive documents.
pub const DEFAULT_SEPARATOR: &str = "\n\n";

/// How the top-ranked document is cut when it alone exceeds the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Cut exactly at the budget boundary.
    #[default]
    Boundary,
    /// Back off to the last whitespace inside the budget; falls back to the
    /// hard boundary when the kept prefix holds no whitespace.
    WordBoundary,
}

/// The context handed to the answer synthesizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssembledContext {
    text: String,
    chars: usize,
    documents_used: usize,
    truncated: bool,
}

impl AssembledContext {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// How many ranked documents contributed to the context.
    pub fn documents_used(&self) -> usize {
        self.documents_used
    }

    /// Whether the top-ranked document had to be cut to fit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for AssembledContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Joins retrieved documents into a bounded context string.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    separator: String,
    truncation: Truncation,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self { separator: DEFAULT_SEPARATOR.to_string(), truncation: Truncation::Boundary }
    }
}

impl ContextAssembler {
    pub fn new(truncation: Truncation) -> Self {
        Self { truncation, ..Self::default() }
    }

    /// Use a different separator between documents.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    /// Assemble `result` into at most `max_budget` characters.
    ///
    /// Never fails; an empty result yields an empty context.
    pub fn assemble(&self, result: &RetrievalResult, max_budget: usize) -> AssembledContext {
        let separator_len = self.separator.chars().count();
        let mut context = AssembledContext::default();

        for (rank, entry) in result.iter().enumerate() {
            let content = entry.document.content.as_str();
            let content_len = content.chars().count();
            let cost = if rank == 0 { content_len } else { separator_len + content_len };

            if context.chars + cost <= max_budget {
                if rank > 0 {
                    context.text.push_str(&self.separator);
                }
                context.text.push_str(content);
                context.chars += cost;
                context.documents_used += 1;
                continue;
            }

            if rank == 0 {
                let kept = match self.truncation {
                    Truncation::Boundary => truncate_chars(content, max_budget),
                    Truncation::WordBoundary => truncate_words(content, max_budget),
                };
                context.chars = kept.chars().count();
                context.text.push_str(kept);
                context.documents_used = 1;
                context.truncated = true;
            }
            break;
        }

        context
    }
}

/// The first `max_chars` characters of `s`.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

fn truncate_words(s: &str, max_chars: usize) -> &str {
    let hard = truncate_chars(s, max_chars);
    let cut_mid_word =
        s[hard.len()..].chars().next().is_some_and(|next| !next.is_whitespace());
    if !cut_mid_word {
        return hard.trim_end();
    }
    match hard.rfind(char::is_whitespace) {
        Some(idx) if !hard[..idx].trim_end().is_empty() => hard[..idx].trim_end(),
        _ => hard,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::document::{Document, ScoredDocument};

    fn result_of(contents: &[&str]) -> RetrievalResult {
        let entries = contents
            .iter()
            .enumerate()
            .map(|(i, c)| ScoredDocument {
                document: Document::new(i.to_string(), *c, "Document"),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect();
        RetrievalResult::ranked(entries, contents.len())
    }

    #[test]
    fn empty_result_yields_empty_context() {
        let context = ContextAssembler::default().assemble(&RetrievalResult::default(), 100);
        assert!(context.is_empty());
        assert_eq!(context.documents_used(), 0);
    }

    #[test]
    fn single_document_under_budget_is_verbatim() {
        let result = result_of(&["Paris is the capital of France."]);
        let context = ContextAssembler::default().assemble(&result, 4096);
        assert_eq!(context.as_str(), "Paris is the capital of France.");
        assert!(!context.is_truncated());
    }

    #[test]
    fn documents_join_in_rank_order() {
        let result = result_of(&["alpha", "beta", "gamma"]);
        let context = ContextAssembler::default().assemble(&result, 100);
        assert_eq!(context.as_str(), "alpha\n\nbeta\n\ngamma");
        assert_eq!(context.len(), 19);
    }

    #[test]
    fn stops_before_the_first_document_that_overflows() {
        // "alpha" (5) + "\n\n" + "beta" (4) = 11; the third would need 18.
        let result = result_of(&["alpha", "beta", "gamma", "z"]);
        let context = ContextAssembler::default().assemble(&result, 12);
        assert_eq!(context.as_str(), "alpha\n\nbeta");
        assert_eq!(context.documents_used(), 2);
    }

    #[test]
    fn oversized_first_document_is_cut_at_budget() {
        let result = result_of(&["abcdefghij", "k"]);
        let context = ContextAssembler::default().assemble(&result, 4);
        assert_eq!(context.as_str(), "abcd");
        assert!(context.is_truncated());
        assert_eq!(context.documents_used(), 1);
    }

    #[test]
    fn word_boundary_mode_backs_off_to_whitespace() {
        let result = result_of(&["Paris is the capital"]);
        let context = ContextAssembler::new(Truncation::WordBoundary).assemble(&result, 14);
        assert_eq!(context.as_str(), "Paris is the");
    }

    #[test]
    fn word_boundary_mode_falls_back_without_whitespace() {
        let result = result_of(&["Donaudampfschifffahrt"]);
        let context = ContextAssembler::new(Truncation::WordBoundary).assemble(&result, 5);
        assert_eq!(context.as_str(), "Donau");
    }

    #[test]
    fn multibyte_content_is_never_split() {
        let result = result_of(&["東京は日本の首都です"]);
        let context = ContextAssembler::default().assemble(&result, 3);
        assert_eq!(context.as_str(), "東京は");
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn custom_separator_counts_against_budget() {
        let result = result_of(&["ab", "cd"]);
        let assembler = ContextAssembler::default().with_separator(" | ");
        assert_eq!(assembler.assemble(&result, 7).as_str(), "ab | cd");
        assert_eq!(assembler.assemble(&result, 6).as_str(), "ab");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn context_never_exceeds_budget(
            contents in proptest::collection::vec("[a-zé ]{0,40}", 0..8),
            budget in 0usize..120,
            word in any::<bool>(),
        ) {
            let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
            let truncation = if word { Truncation::WordBoundary } else { Truncation::Boundary };
            let context = ContextAssembler::new(truncation).assemble(&result_of(&refs), budget);
            prop_assert!(context.as_str().chars().count() <= budget);
            prop_assert_eq!(context.len(), context.as_str().chars().count());
        }

        #[test]
        fn under_budget_keeps_full_concatenation(
            contents in proptest::collection::vec("[a-z ]{0,40}", 0..8),
        ) {
            let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
            let full = refs.join(DEFAULT_SEPARATOR);
            let budget = full.chars().count();
            let context = ContextAssembler::default().assemble(&result_of(&refs), budget);
            prop_assert_eq!(context.as_str(), full.as_str());
        }
    }
}
