//! Runtime settings loaded from `citeflow.toml`.
//!
//! Loads with serde field defaults and environment variable overrides.
//! Validates at startup; a server never boots on a bad config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// The root runtime configuration.
///
/// Maps directly to `citeflow.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Completion backend settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Path to the JSON profile catalog.
    #[serde(default = "default_profiles_path")]
    pub profiles_path: PathBuf,
}

fn default_profiles_path() -> PathBuf {
    PathBuf::from("profiles.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8510
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key; usually supplied via `CITEFLOW_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Deployment used for ordinary turns and search-query generation.
    #[serde(default = "default_standard_deployment")]
    pub standard_deployment: String,

    /// Deployment used when a request asks for the premium model.
    #[serde(default = "default_premium_deployment")]
    pub premium_deployment: String,

    /// Deployment used for query embeddings.
    #[serde(default = "default_embedding_deployment")]
    pub embedding_deployment: String,

    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_standard_deployment() -> String {
    "gpt-4o-mini".into()
}
fn default_premium_deployment() -> String {
    "gpt-4o".into()
}
fn default_embedding_deployment() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.2
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            standard_deployment: default_standard_deployment(),
            premium_deployment: default_premium_deployment(),
            embedding_deployment: default_embedding_deployment(),
            temperature: default_temperature(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            completion: CompletionConfig::default(),
            profiles_path: default_profiles_path(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server", &self.server)
            .field("completion", &self.completion)
            .field("profiles_path", &self.profiles_path)
            .finish()
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("standard_deployment", &self.standard_deployment)
            .field("premium_deployment", &self.premium_deployment)
            .field("embedding_deployment", &self.embedding_deployment)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a file path, with environment overrides:
    /// `CITEFLOW_API_KEY`, `CITEFLOW_API_BASE`, `CITEFLOW_PROFILES`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.completion.api_key.is_none() {
            config.completion.api_key = std::env::var("CITEFLOW_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base) = std::env::var("CITEFLOW_API_BASE") {
            config.completion.api_base = base;
        }

        if let Ok(profiles) = std::env::var("CITEFLOW_PROFILES") {
            config.profiles_path = PathBuf::from(profiles);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path, defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::ValidationError(
                "completion.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }
}
