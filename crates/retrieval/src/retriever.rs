//! The knowledge retriever — turns a search query into a token-budgeted,
//! ranked citation block.
//!
//! Routes to the profile's configured index, embeds the query through the
//! completion client's embedding capability, applies the caller's document
//! selection and ownership filter, and accumulates whole documents until the
//! source-text budget is reached.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use citeflow_config::RagSettings;
use citeflow_core::error::RetrievalError;
use citeflow_core::knowledge::{IndexDocument, KnowledgeSummary};
use citeflow_core::model::ChatModel;
use citeflow_core::token::estimate_tokens;

use crate::index::{IndexQuery, SearchIndex};

/// The caller's selected-documents scope. When present, retrieval is
/// restricted to documents in the set that the requesting user owns — a
/// security filter, not a relevance hint.
#[derive(Debug, Clone)]
pub struct DocumentSelection {
    pub filenames: Vec<String>,
    pub user_id: String,
    pub session_id: String,
}

impl DocumentSelection {
    fn permits(&self, doc: &IndexDocument) -> bool {
        self.filenames.iter().any(|f| f == doc.sourcefile())
            && doc.owned_by(&self.user_id, &self.session_id)
    }
}

/// Routes search queries to named indexes and formats the results.
pub struct KnowledgeRetriever {
    indexes: HashMap<String, Arc<dyn SearchIndex>>,
    embedder: Arc<dyn ChatModel>,
}

impl KnowledgeRetriever {
    pub fn new(embedder: Arc<dyn ChatModel>) -> Self {
        Self {
            indexes: HashMap::new(),
            embedder,
        }
    }

    /// Register an index under its configured name.
    pub fn register(&mut self, index: Arc<dyn SearchIndex>) {
        self.indexes.insert(index.name().to_string(), index);
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.keys().map(|s| s.as_str()).collect()
    }

    /// Run one retrieval pass: embed the query, search the configured
    /// index, apply the security filter, accumulate whole documents until
    /// the source-text budget is reached.
    pub async fn search(
        &self,
        query: &str,
        settings: &RagSettings,
        selection: Option<&DocumentSelection>,
    ) -> Result<KnowledgeSummary, RetrievalError> {
        let query = strip_quotes(query);
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query is empty after stripping quotes".into(),
            ));
        }

        let index = self
            .indexes
            .get(&settings.index_name)
            .ok_or_else(|| RetrievalError::UnknownIndex(settings.index_name.clone()))?;

        let embedding = self
            .embedder
            .embed(vec![query.to_string()])
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RetrievalError::EmbeddingFailed("backend returned no embedding".into())
            })?;

        let results = index
            .query(IndexQuery {
                embedding,
                text: query.to_string(),
                top: settings.document_files_count,
                k_nearest_neighbors: settings.k_nearest_neighbors_count,
            })
            .await?;

        debug!(
            index = %settings.index_name,
            results = results.len(),
            "Vector search returned"
        );

        let permitted: Vec<IndexDocument> = match selection {
            Some(selection) => results
                .into_iter()
                .filter(|doc| selection.permits(doc))
                .collect(),
            None => results,
        };

        // Accumulate whole documents in ranked order until the budget is
        // reached. A document that would overflow ends the block; it is
        // never partially included.
        let mut lines: Vec<String> = Vec::new();
        let mut sources: Vec<IndexDocument> = Vec::new();
        let mut used_tokens = 0usize;

        for doc in permitted {
            let citation = doc.format_as_citation_text();
            let cost = estimate_tokens(&citation);
            if used_tokens + cost > settings.max_source_tokens {
                break;
            }
            used_tokens += cost;
            lines.push(citation);
            sources.push(doc);
        }

        if sources.is_empty() {
            info!(index = %settings.index_name, "No usable sources for query");
            return Ok(KnowledgeSummary::no_sources());
        }

        info!(
            index = %settings.index_name,
            sources = sources.len(),
            tokens = used_tokens,
            "Knowledge retrieved"
        );

        Ok(KnowledgeSummary::new(lines.join("\r\n"), sources))
    }
}

/// Remove quote characters a search-query model likes to wrap output in.
fn strip_quotes(query: &str) -> &str {
    query.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}
