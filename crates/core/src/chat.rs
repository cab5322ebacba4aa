//! Chat request domain types.
//!
//! These are the value objects that flow through the orchestration pipeline:
//! the caller builds a `ChatRequest` per HTTP call, the strategy selector maps
//! it to an approach, and the response assembler copies its identifiers into
//! the final `ApproachResponse`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// One completed (or pending) question/answer pair.
///
/// The most recent turn's `assistant` is `None` until the pipeline answers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// The user's question.
    pub user: String,

    /// The assistant's answer, absent for the turn currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,
}

impl ChatTurn {
    /// An unanswered turn (the question being asked now).
    pub fn question(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: None,
        }
    }

    /// A completed turn.
    pub fn answered(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: Some(assistant.into()),
        }
    }
}

/// The orchestration approach declared by a profile (and echoed on requests).
///
/// Each variant maps to exactly one strategy implementation; the catalog
/// validator enforces that mapping at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    /// Plain model chat, no retrieval.
    Chat,
    /// Retrieval-augmented chat against a search index.
    Rag,
    /// Stateless external assistant endpoint (one JSON round trip).
    Endpoint,
    /// Threaded external assistant endpoint (server-side session state).
    EndpointThread,
}

impl std::fmt::Display for Approach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Chat => "chat",
            Self::Rag => "rag",
            Self::Endpoint => "endpoint",
            Self::EndpointThread => "endpoint_thread",
        };
        write!(f, "{name}")
    }
}

/// Per-request options, parsed once at request entry.
///
/// Replaces the loose string option flags of older clients with a closed set
/// of typed switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Which profile to run. Falls back to the catalog default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Route the turn to the premium model deployment.
    #[serde(default)]
    pub premium_model: bool,

    /// Stream the answer instead of returning one batch response.
    #[serde(default)]
    pub streaming: bool,
}

/// Optional per-request generation overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOverrides {
    /// Sampling temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Override for the number of documents to retrieve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,

    /// Ask the model to suggest follow-up questions.
    #[serde(default)]
    pub suggest_followup_questions: bool,
}

/// A file payload attached to a simple-chat turn, carried as a data URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Original filename, used for labeling extracted text.
    pub name: String,

    /// `data:<media-type>;base64,<payload>` URI.
    pub data_url: String,
}

/// One inbound chat call. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Groups turns into a session.
    pub chat_id: Uuid,

    /// Uniquely identifies this turn for later rating.
    pub chat_turn_id: Uuid,

    /// Conversation so far, ending with the unanswered turn. Must be non-empty.
    pub history: Vec<ChatTurn>,

    /// Caller-selected document filenames scoping retrieval.
    #[serde(default)]
    pub selected_files: Vec<String>,

    /// File attachments for simple-chat turns.
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,

    /// Declared approach; must agree with the resolved profile.
    pub approach: Approach,

    /// Typed per-request option switches.
    #[serde(default)]
    pub options: RequestOptions,

    /// Optional generation overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<RequestOverrides>,
}

impl ChatRequest {
    /// The question being asked this turn: the last history entry's user text.
    pub fn question(&self) -> Option<&str> {
        self.history.last().map(|t| t.user.as_str())
    }

    /// Reject structurally invalid requests before any upstream call.
    pub fn validate(&self) -> Result<(), Error> {
        if self.history.is_empty() {
            return Err(Error::InvalidRequest("history must be non-empty".into()));
        }
        Ok(())
    }
}

/// The requesting user, resolved and authorization-checked upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInformation {
    pub user_id: String,
    pub user_name: String,
    pub session_id: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInformation {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            session_id: session_id.into(),
            groups: Vec::new(),
        }
    }
}

/// Thumbs rating attached to a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    ThumbsUp,
    ThumbsDown,
}

/// A rating event for a previously answered turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRatingRequest {
    pub chat_id: Uuid,
    pub chat_turn_id: Uuid,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_history(history: Vec<ChatTurn>) -> ChatRequest {
        ChatRequest {
            chat_id: Uuid::new_v4(),
            chat_turn_id: Uuid::new_v4(),
            history,
            selected_files: vec![],
            attachments: vec![],
            approach: Approach::Chat,
            options: RequestOptions::default(),
            overrides: None,
        }
    }

    #[test]
    fn empty_history_is_rejected() {
        let req = request_with_history(vec![]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn question_is_last_turn() {
        let req = request_with_history(vec![
            ChatTurn::answered("first", "answer"),
            ChatTurn::question("second"),
        ]);
        assert_eq!(req.question(), Some("second"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn approach_serializes_snake_case() {
        let json = serde_json::to_string(&Approach::EndpointThread).unwrap();
        assert_eq!(json, r#""endpoint_thread""#);
    }

    #[test]
    fn options_default_from_empty_json() {
        let opts: RequestOptions = serde_json::from_str("{}").unwrap();
        assert!(!opts.premium_model);
        assert!(!opts.streaming);
        assert!(opts.profile.is_none());
    }
}
