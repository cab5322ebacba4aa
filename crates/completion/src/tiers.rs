//! Model tier facade — selects the deployment for a request.
//!
//! Two deployments are configured per process: a standard one for ordinary
//! turns and a premium one requested via the per-request option flag. The
//! facade is immutable after construction and shared read-only across all
//! concurrent requests.

use std::sync::Arc;

use citeflow_config::CompletionConfig;
use citeflow_core::error::CompletionError;
use citeflow_core::model::ChatModel;

use crate::openai_compat::OpenAiCompatClient;

/// The standard/premium deployment pair.
pub struct ModelTiers {
    standard: Arc<dyn ChatModel>,
    premium: Arc<dyn ChatModel>,
}

impl ModelTiers {
    pub fn new(standard: Arc<dyn ChatModel>, premium: Arc<dyn ChatModel>) -> Self {
        Self { standard, premium }
    }

    /// Resolve the deployment for a request.
    pub fn select(&self, premium: bool) -> Arc<dyn ChatModel> {
        if premium {
            self.premium.clone()
        } else {
            self.standard.clone()
        }
    }

    pub fn standard(&self) -> Arc<dyn ChatModel> {
        self.standard.clone()
    }
}

/// Build the tier facade and the embedding client from configuration.
pub fn build_from_config(
    config: &CompletionConfig,
) -> Result<(ModelTiers, Arc<dyn ChatModel>), CompletionError> {
    let api_key = config.api_key.clone().unwrap_or_default();

    let standard = OpenAiCompatClient::new(
        &config.standard_deployment,
        &config.api_base,
        &api_key,
    )?;
    let premium = OpenAiCompatClient::new(
        &config.premium_deployment,
        &config.api_base,
        &api_key,
    )?;
    let embedder = OpenAiCompatClient::new(
        &config.embedding_deployment,
        &config.api_base,
        &api_key,
    )?
    .with_embedding_deployment(&config.embedding_deployment);

    Ok((
        ModelTiers::new(Arc::new(standard), Arc::new(premium)),
        Arc::new(embedder),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use citeflow_core::model::{Completion, CompletionRequest};

    struct NamedModel(&'static str);

    #[async_trait]
    impl ChatModel for NamedModel {
        fn deployment(&self) -> &str {
            self.0
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<Completion, CompletionError> {
            unreachable!("not called in tier tests")
        }
    }

    #[test]
    fn selects_standard_by_default() {
        let tiers = ModelTiers::new(
            Arc::new(NamedModel("standard")),
            Arc::new(NamedModel("premium")),
        );
        assert_eq!(tiers.select(false).deployment(), "standard");
    }

    #[test]
    fn premium_flag_selects_premium() {
        let tiers = ModelTiers::new(
            Arc::new(NamedModel("standard")),
            Arc::new(NamedModel("premium")),
        );
        assert_eq!(tiers.select(true).deployment(), "premium");
    }

    #[test]
    fn builds_all_clients_from_config() {
        let config = CompletionConfig::default();
        let (tiers, embedder) = build_from_config(&config).unwrap();
        assert_eq!(tiers.select(false).deployment(), "gpt-4o-mini");
        assert_eq!(tiers.select(true).deployment(), "gpt-4o");
        assert_eq!(embedder.deployment(), "text-embedding-3-small");
    }
}
