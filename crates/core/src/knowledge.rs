//! Retrieved knowledge types.
//!
//! Search indexes come in a small closed set of schema shapes. Rather than an
//! inheritance chain, `IndexDocument` is a tagged union whose variants share
//! one citation capability: `filepath()`, `content()`,
//! `format_as_citation_text()`.

use serde::{Deserialize, Serialize};

/// Protocol constant between the retriever and the orchestrator: a
/// `KnowledgeSummary` whose formatted text equals this sentinel signals
/// "zero usable documents". Compared structurally, never rebuilt at call
/// sites.
pub const NO_SOURCES: &str = "NO_SOURCES";

/// A document returned from a search index, polymorphic over index schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum IndexDocument {
    /// Row-per-chunk schema written by the ingestion pipeline. Carries the
    /// ownership metadata the security filter reads.
    Chunk {
        chunk_id: String,
        sourcefile: String,
        chunk_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        score: f32,
    },

    /// Page-per-row schema written by the PDF splitter.
    Page {
        id: String,
        sourcepage: String,
        sourcefile: String,
        content: String,
        #[serde(default)]
        score: f32,
    },
}

impl IndexDocument {
    /// Citation identity: the name clients resolve against the citation base
    /// URL.
    pub fn filepath(&self) -> &str {
        match self {
            Self::Chunk { sourcefile, .. } => sourcefile,
            Self::Page { sourcepage, .. } => sourcepage,
        }
    }

    /// The source-file identity used by the selected-documents filter.
    pub fn sourcefile(&self) -> &str {
        match self {
            Self::Chunk { sourcefile, .. } => sourcefile,
            Self::Page { sourcefile, .. } => sourcefile,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Chunk { chunk_text, .. } => chunk_text,
            Self::Page { content, .. } => content,
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            Self::Chunk { score, .. } => *score,
            Self::Page { score, .. } => *score,
        }
    }

    /// One line of the formatted source block: `filepath: flattened content`.
    pub fn format_as_citation_text(&self) -> String {
        let flattened = self
            .content()
            .replace('\r', " ")
            .replace('\n', " ");
        format!("{}: {}", self.filepath(), flattened.trim())
    }

    /// Whether this document's ownership metadata matches the requesting
    /// user. Page documents carry no ownership and match nobody.
    pub fn owned_by(&self, user_id: &str, session_id: &str) -> bool {
        match self {
            Self::Chunk {
                user_id: owner,
                session_id: session,
                ..
            } => {
                owner.as_deref() == Some(user_id) && session.as_deref() == Some(session_id)
            }
            Self::Page { .. } => false,
        }
    }
}

/// The retriever's output: a ranked, token-budgeted citation block plus the
/// documents it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub formatted_source_text: String,
    pub sources: Vec<IndexDocument>,
}

impl KnowledgeSummary {
    pub fn new(formatted_source_text: String, sources: Vec<IndexDocument>) -> Self {
        Self {
            formatted_source_text,
            sources,
        }
    }

    /// The distinguished "zero usable documents" outcome. Callers must check
    /// for it explicitly; it is data, not an error.
    pub fn no_sources() -> Self {
        Self {
            formatted_source_text: NO_SOURCES.into(),
            sources: Vec::new(),
        }
    }

    pub fn has_sources(&self) -> bool {
        self.formatted_source_text != NO_SOURCES && !self.sources.is_empty()
    }
}
