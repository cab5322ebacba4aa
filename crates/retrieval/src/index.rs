//! Search index abstraction and the in-memory implementation.
//!
//! The `SearchIndex` trait is the seam to whatever actually serves vector
//! queries; `InMemoryIndex` ranks by cosine similarity and backs tests and
//! local runs.

use async_trait::async_trait;
use tokio::sync::RwLock;

use citeflow_core::error::RetrievalError;
use citeflow_core::knowledge::IndexDocument;

/// One vector query against an index.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// Embedding of the search query text.
    pub embedding: Vec<f32>,

    /// The query text itself, for indexes that run hybrid search.
    pub text: String,

    /// How many documents to return.
    pub top: usize,

    /// Nearest-neighbor fan-out per query vector.
    pub k_nearest_neighbors: usize,
}

/// A backend that serves ranked vector similarity queries.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// The index name profiles refer to.
    fn name(&self) -> &str;

    /// Return up to `query.top` documents ranked by similarity.
    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexDocument>, RetrievalError>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 for zero-length, empty, or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// A document plus its embedding, as stored in the in-memory index.
struct IndexedEntry {
    embedding: Vec<f32>,
    document: IndexDocument,
}

/// Cosine-ranked in-memory index.
pub struct InMemoryIndex {
    name: String,
    entries: RwLock<Vec<IndexedEntry>>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Add a document with its embedding.
    pub async fn insert(&self, embedding: Vec<f32>, document: IndexDocument) {
        self.entries.write().await.push(IndexedEntry {
            embedding,
            document,
        });
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexDocument>, RetrievalError> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(f32, IndexDocument)> = entries
            .iter()
            .map(|entry| {
                let sim = cosine_similarity(&entry.embedding, &query.embedding);
                let mut doc = entry.document.clone();
                match &mut doc {
                    IndexDocument::Chunk { score, .. } => *score = sim,
                    IndexDocument::Page { score, .. } => *score = sim,
                }
                (sim, doc)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.top);

        Ok(scored.into_iter().map(|(_, d)| d).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> IndexDocument {
        IndexDocument::Chunk {
            chunk_id: id.into(),
            sourcefile: format!("{id}.pdf"),
            chunk_text: text.into(),
            user_id: None,
            session_id: None,
            score: 0.0,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let index = InMemoryIndex::new("test");
        index.insert(vec![0.0, 1.0, 0.0], chunk("a", "orthogonal")).await;
        index.insert(vec![1.0, 0.0, 0.0], chunk("b", "identical")).await;
        index.insert(vec![0.5, 0.5, 0.0], chunk("c", "partial")).await;

        let results = index
            .query(IndexQuery {
                embedding: vec![1.0, 0.0, 0.0],
                text: "q".into(),
                top: 10,
                k_nearest_neighbors: 3,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].sourcefile(), "b.pdf");
        assert_eq!(results[1].sourcefile(), "c.pdf");
        assert!(results[0].score() > results[1].score());
    }

    #[tokio::test]
    async fn query_respects_top() {
        let index = InMemoryIndex::new("test");
        for i in 0..10 {
            index
                .insert(vec![1.0, i as f32 * 0.1], chunk(&format!("d{i}"), "text"))
                .await;
        }

        let results = index
            .query(IndexQuery {
                embedding: vec![1.0, 0.0],
                text: "q".into(),
                top: 4,
                k_nearest_neighbors: 3,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
    }
}
