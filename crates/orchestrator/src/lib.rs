//! Chat orchestration for Citeflow.
//!
//! One strategy per approach, all implementing the `ChatApproach` contract:
//! consume (user, profile, request), produce a batch response or a chunk
//! stream terminating in exactly one final chunk. Pipeline step state lives
//! in the typed `TurnContext`; assembly (citations, follow-ups, diagnostics)
//! runs exactly once per turn.

pub mod approach;
pub mod approaches;
pub mod assembler;
pub mod attachments;
pub mod context;
pub mod selector;

pub use approach::{
    collect_final, ApproachKind, ChatApproach, ChunkReceiver, NO_SOURCES_ANSWER,
    POLICY_VIOLATION_ANSWER,
};
pub use approaches::endpoint::{AssistantBackend, EndpointChat, HttpAssistantBackend};
pub use approaches::endpoint_thread::{ThreadCache, ThreadedEndpointChat};
pub use approaches::rag::RagChat;
pub use approaches::rag_stream::RagChatStream;
pub use approaches::simple::SimpleChat;
pub use attachments::{TextExtraction, Utf8TextExtraction};
pub use context::TurnContext;
pub use selector::{resolve_kind, StrategySet};
