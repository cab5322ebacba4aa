//! Profile catalog — the per-approach configuration bundles.
//!
//! Profiles are loaded once at startup from a JSON catalog and read-only
//! thereafter. Validation is strict and fails fast: a profile whose settings
//! cannot select exactly one orchestration strategy never reaches request
//! handling.

use serde::{Deserialize, Serialize};
use std::path::Path;

use citeflow_core::Approach;

use crate::ConfigError;

/// How a profile scopes retrieval results to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityModel {
    /// No per-user scoping; the index is shared.
    #[default]
    None,
    /// Results restricted to documents the requesting user owns.
    UserDocuments,
    /// Results restricted by group membership (enforced upstream).
    GroupMembership,
}

/// Retrieval settings, present iff the profile's approach retrieves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// Which search index this profile queries.
    pub index_name: String,

    /// How many documents to request from the index.
    #[serde(default = "default_document_files_count")]
    pub document_files_count: usize,

    /// Nearest-neighbor fan-out per query vector.
    #[serde(default = "default_knn_count")]
    pub k_nearest_neighbors_count: usize,

    /// Cumulative token budget for the formatted source block.
    #[serde(default = "default_max_source_tokens")]
    pub max_source_tokens: usize,

    /// Base URL citations resolve against in the client.
    #[serde(default)]
    pub citation_base_url: String,
}

fn default_document_files_count() -> usize {
    5
}
fn default_knn_count() -> usize {
    3
}
fn default_max_source_tokens() -> usize {
    2048
}

/// External assistant endpoint settings, present iff the approach is an
/// endpoint variant.
#[derive(Clone, Serialize, Deserialize)]
pub struct AssistantEndpointSettings {
    /// Endpoint URL.
    pub api_url: String,

    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: String,
}

impl std::fmt::Debug for AssistantEndpointSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantEndpointSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// One named approach configuration bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDefinition {
    /// Unique profile name shown in pickers.
    pub name: String,

    /// Which orchestration strategy this profile selects.
    pub approach: Approach,

    /// Retrieval scoping model.
    #[serde(default)]
    pub security_model: SecurityModel,

    /// Present iff `approach` retrieves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_settings: Option<RagSettings>,

    /// Present iff `approach` is an endpoint variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_endpoint: Option<AssistantEndpointSettings>,

    /// Questions offered to the user as conversation starters.
    #[serde(default)]
    pub sample_questions: Vec<String>,

    /// Named prompt template used as the chat system message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_system_message_file: Option<String>,
}

impl ProfileDefinition {
    /// Whether this profile's approach runs the retrieval steps.
    pub fn retrieves(&self) -> bool {
        self.approach == Approach::Rag
    }

    /// Whether this profile's approach calls an external assistant endpoint.
    pub fn uses_endpoint(&self) -> bool {
        matches!(self.approach, Approach::Endpoint | Approach::EndpointThread)
    }

    /// Retrieval settings, or a configuration error naming the profile.
    pub fn rag_settings(&self) -> Result<&RagSettings, citeflow_core::Error> {
        self.rag_settings
            .as_ref()
            .ok_or_else(|| citeflow_core::Error::Config {
                message: format!("Profile '{}' has no rag_settings", self.name),
            })
    }

    /// Endpoint settings, or a configuration error naming the profile.
    pub fn assistant_endpoint(
        &self,
    ) -> Result<&AssistantEndpointSettings, citeflow_core::Error> {
        self.assistant_endpoint
            .as_ref()
            .ok_or_else(|| citeflow_core::Error::Config {
                message: format!("Profile '{}' has no assistant_endpoint", self.name),
            })
    }
}

/// The startup-loaded, read-only set of profiles.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: Vec<ProfileDefinition>,
}

impl ProfileCatalog {
    /// Load and validate a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let catalog = Self::from_json(&content)?;
        tracing::info!(profiles = catalog.profiles.len(), "Profile catalog loaded");
        Ok(catalog)
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let profiles: Vec<ProfileDefinition> = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidCatalog(format!("catalog parse failed: {e}")))?;
        Self::from_profiles(profiles)
    }

    /// Validate an already-built list of profiles.
    pub fn from_profiles(profiles: Vec<ProfileDefinition>) -> Result<Self, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::InvalidCatalog(
                "catalog must contain at least one profile".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::InvalidCatalog(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
            validate_profile(profile)?;
        }

        Ok(Self { profiles })
    }

    pub fn get(&self, name: &str) -> Option<&ProfileDefinition> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The first catalog entry, used when a request names no profile.
    pub fn default_profile(&self) -> &ProfileDefinition {
        &self.profiles[0]
    }

    pub fn profiles(&self) -> &[ProfileDefinition] {
        &self.profiles
    }
}

/// Enforce the settings-iff-approach invariants for one profile.
fn validate_profile(profile: &ProfileDefinition) -> Result<(), ConfigError> {
    if profile.retrieves() {
        let Some(rag) = &profile.rag_settings else {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}' selects a retrieval approach but has no rag_settings",
                profile.name
            )));
        };
        if rag.document_files_count == 0 {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}': document_files_count must be >= 1",
                profile.name
            )));
        }
        if rag.k_nearest_neighbors_count == 0 {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}': k_nearest_neighbors_count must be >= 1",
                profile.name
            )));
        }
        if rag.index_name.is_empty() {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}': index_name must be set",
                profile.name
            )));
        }
    } else if profile.rag_settings.is_some() {
        return Err(ConfigError::InvalidCatalog(format!(
            "profile '{}' carries rag_settings but its approach never retrieves",
            profile.name
        )));
    }

    if profile.uses_endpoint() {
        let Some(endpoint) = &profile.assistant_endpoint else {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}' selects an endpoint approach but has no assistant_endpoint",
                profile.name
            )));
        };
        if endpoint.api_url.is_empty() {
            return Err(ConfigError::InvalidCatalog(format!(
                "profile '{}': assistant_endpoint.api_url must be set",
                profile.name
            )));
        }
    } else if profile.assistant_endpoint.is_some() {
        return Err(ConfigError::InvalidCatalog(format!(
            "profile '{}' carries assistant_endpoint but its approach is local",
            profile.name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rag_profile_json() -> &'static str {
        r#"[{
            "name": "Auto Manuals",
            "approach": "rag",
            "rag_settings": {
                "index_name": "manuals",
                "citation_base_url": "https://docs.example.com"
            },
            "sample_questions": ["How do I change the oil?"]
        }]"#
    }

    #[test]
    fn parses_valid_catalog_with_defaults() {
        let catalog = ProfileCatalog::from_json(rag_profile_json()).unwrap();
        let profile = catalog.get("Auto Manuals").unwrap();
        assert_eq!(profile.approach, Approach::Rag);

        let rag = profile.rag_settings().unwrap();
        assert_eq!(rag.document_files_count, 5);
        assert_eq!(rag.k_nearest_neighbors_count, 3);
        assert_eq!(rag.max_source_tokens, 2048);
    }

    #[test]
    fn rejects_rag_profile_without_settings() {
        let json = r#"[{"name": "Broken", "approach": "rag"}]"#;
        let err = ProfileCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("rag_settings"));
    }

    #[test]
    fn rejects_unknown_approach_at_parse_time() {
        let json = r#"[{"name": "Mystery", "approach": "telepathy"}]"#;
        assert!(ProfileCatalog::from_json(json).is_err());
    }

    #[test]
    fn rejects_endpoint_profile_without_endpoint() {
        let json = r#"[{"name": "Remote", "approach": "endpoint_thread"}]"#;
        let err = ProfileCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("assistant_endpoint"));
    }

    #[test]
    fn rejects_chat_profile_with_rag_settings() {
        let json = r#"[{
            "name": "Chatty",
            "approach": "chat",
            "rag_settings": {"index_name": "x"}
        }]"#;
        assert!(ProfileCatalog::from_json(json).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let json = r#"[
            {"name": "A", "approach": "chat"},
            {"name": "A", "approach": "chat"}
        ]"#;
        let err = ProfileCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_empty_catalog() {
        assert!(ProfileCatalog::from_json("[]").is_err());
    }

    #[test]
    fn rejects_zero_document_count() {
        let json = r#"[{
            "name": "Zero",
            "approach": "rag",
            "rag_settings": {"index_name": "x", "document_files_count": 0}
        }]"#;
        assert!(ProfileCatalog::from_json(json).is_err());
    }

    #[test]
    fn default_profile_is_first() {
        let json = r#"[
            {"name": "First", "approach": "chat"},
            {"name": "Second", "approach": "chat"}
        ]"#;
        let catalog = ProfileCatalog::from_json(json).unwrap();
        assert_eq!(catalog.default_profile().name, "First");
    }

    #[test]
    fn endpoint_debug_redacts_key() {
        let settings = AssistantEndpointSettings {
            api_url: "https://assistant.example.com".into(),
            api_key: "sk-hidden".into(),
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-hidden"));
    }
}
