//! Data types for documents, retrieval results, and answers.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A scalar metadata value attached to a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// A document held by the vector index.
///
/// The query pipeline only ever reads documents; it never mutates or
/// persists them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document within its collection.
    pub id: String,
    /// The retrievable text of the document.
    pub content: String,
    /// Scalar key-value metadata associated with the document.
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
    /// The collection this document belongs to.
    pub collection_name: String,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        collection_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            collection_name: collection_name.into(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A retrieved [`Document`] paired with its backend-reported similarity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredDocument {
    /// The retrieved document.
    pub document: Document,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// Order two document ids ascending.
///
/// Ids that both parse as unsigned integers compare numerically so that
/// `"2"` sorts before `"10"`; anything else compares lexicographically.
/// Numerically equal ids (`"01"`, `"1"`) fall back to lexicographic order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// NaN scores rank below every real score.
fn rank_score(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

/// Rank order: score descending, exact ties by ascending id.
pub(crate) fn rank_order(a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
    rank_score(b.score)
        .total_cmp(&rank_score(a.score))
        .then_with(|| compare_ids(&a.document.id, &b.document.id))
}

/// Ranked documents for one query: at most `k` entries, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RetrievalResult {
    entries: Vec<ScoredDocument>,
}

impl RetrievalResult {
    /// Sort `entries` into rank order and keep the first `k`.
    pub fn ranked(mut entries: Vec<ScoredDocument>, k: usize) -> Self {
        entries.sort_by(rank_order);
        entries.truncate(k);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScoredDocument] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredDocument> {
        self.entries.iter()
    }

    /// Ids in rank order.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.document.id.as_str()).collect()
    }

    /// Consume the result, keeping only the documents in rank order.
    pub fn into_documents(self) -> Vec<Document> {
        self.entries.into_iter().map(|e| e.document).collect()
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a ScoredDocument;
    type IntoIter = std::slice::Iter<'a, ScoredDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// The terminal artifact of a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The generated answer text.
    pub text: String,
    /// Documents the answer was grounded on, in rank order. Only populated
    /// when the caller asked for them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<Document>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32) -> ScoredDocument {
        ScoredDocument { document: Document::new(id, format!("doc {id}"), "Document"), score }
    }

    #[test]
    fn numeric_ids_compare_numerically() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("5", "2"), Ordering::Greater);
        assert_eq!(compare_ids("a", "b"), Ordering::Less);
        assert_eq!(compare_ids("10", "b"), Ordering::Less);
    }

    #[test]
    fn ranked_sorts_by_score_then_id_and_truncates() {
        let result = RetrievalResult::ranked(
            vec![scored("5", 0.8), scored("9", 0.1), scored("2", 0.8), scored("7", 0.95)],
            3,
        );
        assert_eq!(result.ids(), vec!["7", "2", "5"]);
    }

    #[test]
    fn nan_scores_rank_last_without_panicking() {
        let entries: Vec<ScoredDocument> = (0..40)
            .map(|i| scored(&i.to_string(), if i % 3 == 0 { f32::NAN } else { i as f32 / 40.0 }))
            .collect();
        let result = RetrievalResult::ranked(entries, 40);

        assert_eq!(result.len(), 40);
        let first_nan = result.iter().position(|e| e.score.is_nan()).unwrap();
        assert!(result.entries()[..first_nan].iter().all(|e| !e.score.is_nan()));
        assert!(result.entries()[first_nan..].iter().all(|e| e.score.is_nan()));
        assert_eq!(result.ids()[0], "38");
        // NaN entries fall back to id order among themselves.
        assert_eq!(result.ids()[first_nan], "0");
        assert_eq!(result.ids()[first_nan + 1], "3");
    }

    #[test]
    fn metadata_values_deserialize_untagged() {
        let json = r#"{"id":"1","content":"x","collection_name":"Document",
            "metadata":{"page":3,"lang":"fr","draft":false,"weight":0.5}}"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.metadata["page"], MetadataValue::Int(3));
        assert_eq!(doc.metadata["lang"], MetadataValue::Text("fr".into()));
        assert_eq!(doc.metadata["draft"], MetadataValue::Bool(false));
        assert_eq!(doc.metadata["weight"], MetadataValue::Float(0.5));
    }
}
