//! The strategy contract every orchestration approach implements.

use async_trait::async_trait;
use tokio::sync::mpsc;

use citeflow_config::ProfileDefinition;
use citeflow_core::chat::{ChatRequest, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::response::{ApproachResponse, ChatChunkResponse};

/// Fixed answer for the no-sources soft failure. A protocol string, not
/// free text at call sites.
pub const NO_SOURCES_ANSWER: &str =
    "I couldn't find any sources that answer that question. \
     Try selecting different documents or rephrasing it.";

/// Fixed answer when the content management policy rejects the input.
pub const POLICY_VIOLATION_ANSWER: &str =
    "Your message was rejected by the content management policy. \
     Please rephrase it and try again.";

/// The closed set of resolved strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachKind {
    SimpleChat,
    RagBatch,
    RagStreaming,
    EndpointStateless,
    EndpointThreaded,
}

impl ApproachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleChat => "simple_chat",
            Self::RagBatch => "rag_batch",
            Self::RagStreaming => "rag_streaming",
            Self::EndpointStateless => "endpoint_stateless",
            Self::EndpointThreaded => "endpoint_threaded",
        }
    }
}

/// Receiver side of a chunk stream. The producer closing the channel
/// without a terminal chunk means the stream failed or was cancelled.
pub type ChunkReceiver = mpsc::Receiver<Result<ChatChunkResponse, Error>>;

/// One orchestration strategy.
///
/// `reply` runs the pipeline to a single batch response; `reply_streaming`
/// yields partial chunks ending in exactly one terminal chunk. The default
/// streaming implementation wraps the batch reply as a single terminal
/// chunk, which is the correct behavior for strategies with no incremental
/// output.
#[async_trait]
pub trait ChatApproach: Send + Sync {
    fn kind(&self) -> ApproachKind;

    async fn reply(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error>;

    async fn reply_streaming(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, Error> {
        let response = self.reply(user, profile, request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
        Ok(rx)
    }
}

/// Drain a chunk stream to its terminal response.
///
/// Used by streaming-native strategies to satisfy the batch contract, and
/// by tests. An exhausted stream with no terminal chunk is an error: that
/// is the wire signal for a failed stream.
pub async fn collect_final(mut rx: ChunkReceiver) -> Result<ApproachResponse, Error> {
    while let Some(item) = rx.recv().await {
        let chunk = item?;
        if let Some(final_result) = chunk.final_result {
            return Ok(final_result);
        }
    }
    Err(Error::Internal(
        "stream ended without a terminal chunk".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_final_returns_terminal_result() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(ChatChunkResponse::delta("partial "))).await.unwrap();
        tx.send(Ok(ChatChunkResponse::terminal(ApproachResponse {
            answer: "partial answer".into(),
            thoughts: None,
            data_points: vec![],
            citation_base_url: String::new(),
            message_id: uuid::Uuid::new_v4(),
            chat_id: uuid::Uuid::new_v4(),
            followup_questions: vec![],
            diagnostics: None,
            error: None,
        })))
        .await
        .unwrap();
        drop(tx);

        let response = collect_final(rx).await.unwrap();
        assert_eq!(response.answer, "partial answer");
    }

    #[tokio::test]
    async fn collect_final_errors_on_missing_terminal() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(ChatChunkResponse::delta("partial"))).await.unwrap();
        drop(tx);

        assert!(collect_final(rx).await.is_err());
    }
}
