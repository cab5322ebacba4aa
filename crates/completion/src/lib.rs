//! Completion client implementations for Citeflow.
//!
//! The `ChatModel` trait lives in `citeflow-core`; this crate provides the
//! OpenAI-compatible HTTP implementation and the standard/premium tier
//! facade the orchestrator selects deployments through.

mod openai_compat;
mod tiers;

pub use openai_compat::OpenAiCompatClient;
pub use tiers::{ModelTiers, build_from_config};
