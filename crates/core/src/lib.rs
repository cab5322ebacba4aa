//! # Citeflow Core
//!
//! Domain types, traits, and error definitions for the Citeflow RAG chat
//! backend. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is defined as a trait or closed enum here.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod chat;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod response;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use chat::{
    Approach, ChatRatingRequest, ChatRequest, ChatTurn, FileAttachment, Rating, RequestOptions,
    RequestOverrides, UserInformation,
};
pub use error::{CompletionError, EndpointError, Error, Result, RetrievalError};
pub use knowledge::{IndexDocument, KnowledgeSummary, NO_SOURCES};
pub use model::{
    ChatMessage, ChatModel, ChatRole, Completion, CompletionRequest, TextDelta, Usage,
};
pub use response::{ApproachResponse, ChatChunkResponse, DataPoint, Diagnostics};
