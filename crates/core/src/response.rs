//! Response domain types.
//!
//! An `ApproachResponse` is built exactly once per turn by the response
//! assembler and never mutated afterwards. Streaming strategies wrap it in a
//! terminal `ChatChunkResponse` after zero or more text chunks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One retrieved source surfaced alongside the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Source document identity (filename or page reference).
    pub title: String,
    /// The source text handed to the model.
    pub content: String,
}

/// Per-turn diagnostics, derived once and attached read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub completion_tokens: u32,
    pub prompt_tokens: u32,
    pub total_tokens: u32,
    /// Wall-clock duration of the answer-generating model call.
    pub answer_duration_ms: u64,
    /// Which deployment produced the answer.
    pub model_deployment_name: String,
    /// Wall-clock duration of the whole pipeline.
    pub workflow_duration_ms: u64,
}

/// The final, immutable result of one orchestrated turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproachResponse {
    /// Display-ready answer text (citations numbered, newlines converted).
    pub answer: String,

    /// Human-readable trace of what the pipeline did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,

    /// Sources the answer was grounded in, in citation-number order.
    #[serde(default)]
    pub data_points: Vec<DataPoint>,

    /// Base URL citations resolve against in the client.
    pub citation_base_url: String,

    /// Copied from the request's turn id, never regenerated.
    pub message_id: Uuid,

    /// Copied from the request's chat id, never regenerated.
    pub chat_id: Uuid,

    /// Suggested follow-up questions extracted from the raw answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub followup_questions: Vec<String>,

    /// Token counts and timings; absent when the strategy has no usage source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,

    /// Unset for soft failures; hard failures never produce a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One unit in a streamed response sequence.
///
/// Every chunk before the last carries text and no `final_result`; the
/// terminal chunk carries empty text and the populated result. Exactly one
/// terminal chunk is emitted per successful stream, in generation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkResponse {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<ApproachResponse>,
}

impl ChatChunkResponse {
    /// A partial text chunk.
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            final_result: None,
        }
    }

    /// The terminal chunk closing a stream.
    pub fn terminal(result: ApproachResponse) -> Self {
        Self {
            text: String::new(),
            final_result: Some(result),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_result.is_some()
    }
}
