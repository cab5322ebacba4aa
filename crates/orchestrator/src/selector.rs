//! Strategy selection — one pure mapping from (profile approach, request
//! options) to a strategy instance.
//!
//! The set is built once at startup; unknown approach names already failed
//! catalog validation by the time a request arrives.

use std::sync::Arc;

use citeflow_completion::ModelTiers;
use citeflow_config::ProfileDefinition;
use citeflow_core::chat::{Approach, RequestOptions};
use citeflow_retrieval::KnowledgeRetriever;

use crate::approach::{ApproachKind, ChatApproach};
use crate::approaches::endpoint::{AssistantBackend, EndpointChat};
use crate::approaches::endpoint_thread::ThreadedEndpointChat;
use crate::approaches::rag::{RagChat, RagPipeline};
use crate::approaches::rag_stream::RagChatStream;
use crate::approaches::simple::SimpleChat;
use crate::attachments::TextExtraction;

/// Map a profile approach and request options to a strategy variant.
pub fn resolve_kind(approach: Approach, options: &RequestOptions) -> ApproachKind {
    match approach {
        Approach::Chat => ApproachKind::SimpleChat,
        Approach::Rag if options.streaming => ApproachKind::RagStreaming,
        Approach::Rag => ApproachKind::RagBatch,
        Approach::Endpoint => ApproachKind::EndpointStateless,
        Approach::EndpointThread => ApproachKind::EndpointThreaded,
    }
}

/// The startup-built strategy instances, shared across all requests.
pub struct StrategySet {
    simple: Arc<dyn ChatApproach>,
    rag: Arc<dyn ChatApproach>,
    rag_stream: Arc<dyn ChatApproach>,
    endpoint: Arc<dyn ChatApproach>,
    endpoint_thread: Arc<dyn ChatApproach>,
}

impl StrategySet {
    pub fn new(
        models: Arc<ModelTiers>,
        retriever: Arc<KnowledgeRetriever>,
        backend: Arc<dyn AssistantBackend>,
        extractor: Arc<dyn TextExtraction>,
        temperature: f32,
    ) -> Self {
        let pipeline = RagPipeline::new(models.clone(), retriever, temperature);
        Self {
            simple: Arc::new(SimpleChat::new(models, extractor, temperature)),
            rag: Arc::new(RagChat::new(pipeline.clone())),
            rag_stream: Arc::new(RagChatStream::new(pipeline)),
            endpoint: Arc::new(EndpointChat::new(backend.clone())),
            endpoint_thread: Arc::new(ThreadedEndpointChat::new(backend)),
        }
    }

    pub fn resolve(
        &self,
        profile: &ProfileDefinition,
        options: &RequestOptions,
    ) -> Arc<dyn ChatApproach> {
        match resolve_kind(profile.approach, options) {
            ApproachKind::SimpleChat => self.simple.clone(),
            ApproachKind::RagBatch => self.rag.clone(),
            ApproachKind::RagStreaming => self.rag_stream.clone(),
            ApproachKind::EndpointStateless => self.endpoint.clone(),
            ApproachKind::EndpointThreaded => self.endpoint_thread.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approaches::test_helpers::*;
    use crate::attachments::Utf8TextExtraction;

    async fn strategy_set() -> StrategySet {
        let model = scripted_model(vec![]);
        StrategySet::new(
            tiers_for(model),
            retriever_with_sources(vec![]).await,
            scripted_backend(""),
            Arc::new(Utf8TextExtraction),
            0.2,
        )
    }

    #[test]
    fn kind_resolution_is_total() {
        let batch = RequestOptions::default();
        let streaming = RequestOptions {
            streaming: true,
            ..Default::default()
        };

        assert_eq!(resolve_kind(Approach::Chat, &batch), ApproachKind::SimpleChat);
        assert_eq!(resolve_kind(Approach::Rag, &batch), ApproachKind::RagBatch);
        assert_eq!(
            resolve_kind(Approach::Rag, &streaming),
            ApproachKind::RagStreaming
        );
        assert_eq!(
            resolve_kind(Approach::Endpoint, &batch),
            ApproachKind::EndpointStateless
        );
        assert_eq!(
            resolve_kind(Approach::EndpointThread, &streaming),
            ApproachKind::EndpointThreaded
        );
    }

    #[tokio::test]
    async fn resolves_matching_strategy_instances() {
        let set = strategy_set().await;

        let batch = RequestOptions::default();
        let streaming = RequestOptions {
            streaming: true,
            ..Default::default()
        };

        assert_eq!(
            set.resolve(&rag_profile(), &batch).kind(),
            ApproachKind::RagBatch
        );
        assert_eq!(
            set.resolve(&rag_profile(), &streaming).kind(),
            ApproachKind::RagStreaming
        );
        assert_eq!(
            set.resolve(&chat_profile(), &batch).kind(),
            ApproachKind::SimpleChat
        );
        assert_eq!(
            set.resolve(&endpoint_profile(), &batch).kind(),
            ApproachKind::EndpointStateless
        );
        assert_eq!(
            set.resolve(&endpoint_thread_profile(), &batch).kind(),
            ApproachKind::EndpointThreaded
        );
    }
}
