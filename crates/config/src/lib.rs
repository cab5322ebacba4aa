//! Configuration loading and validation for Citeflow.
//!
//! Two sources, both read once at startup:
//! - `citeflow.toml` — runtime settings (server, completion backend), with
//!   environment variable overrides.
//! - `profiles.json` — the profile catalog selecting orchestration
//!   strategies; validated strictly so misconfigured profiles fail the boot,
//!   never a request.

use std::path::PathBuf;

mod profile;
mod settings;

pub use profile::{
    AssistantEndpointSettings, ProfileCatalog, ProfileDefinition, RagSettings, SecurityModel,
};
pub use settings::{AppConfig, CompletionConfig, ServerConfig};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid profile catalog: {0}")]
    InvalidCatalog(String),
}
