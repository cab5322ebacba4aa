//! External assistant endpoint support.
//!
//! The assistant service sits behind the `AssistantBackend` trait: a
//! stateless chat call (v1), and thread creation plus a line-delimited run
//! stream (v2). The HTTP implementation lives here; strategies depend only
//! on the trait.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use citeflow_config::{AssistantEndpointSettings, ProfileDefinition};
use citeflow_core::chat::{ChatRequest, ChatTurn, UserInformation};
use citeflow_core::error::{EndpointError, Error};
use citeflow_core::response::ApproachResponse;

use crate::approach::{ApproachKind, ChatApproach};
use crate::assembler;

/// The external assistant service seam.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// v1: forward the whole history, get one answer back.
    async fn chat(
        &self,
        settings: &AssistantEndpointSettings,
        history: &[ChatTurn],
    ) -> Result<String, EndpointError>;

    /// v2: create a server-side thread for a chat session.
    async fn create_thread(
        &self,
        settings: &AssistantEndpointSettings,
    ) -> Result<String, EndpointError>;

    /// v2: run one message on a thread; the reply body is forwarded line by
    /// line.
    async fn run_thread(
        &self,
        settings: &AssistantEndpointSettings,
        thread_id: &str,
        message: &str,
    ) -> Result<mpsc::Receiver<Result<String, EndpointError>>, EndpointError>;
}

/// Reqwest-backed assistant client.
pub struct HttpAssistantBackend {
    client: reqwest::Client,
}

impl HttpAssistantBackend {
    pub fn new() -> Result<Self, EndpointError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EndpointError> {
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Assistant endpoint returned error");
            return Err(EndpointError::Http {
                status_code: status,
                message: body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AssistantBackend for HttpAssistantBackend {
    async fn chat(
        &self,
        settings: &AssistantEndpointSettings,
        history: &[ChatTurn],
    ) -> Result<String, EndpointError> {
        debug!(url = %settings.api_url, turns = history.len(), "Assistant chat call");

        let response = self
            .client
            .post(&settings.api_url)
            .bearer_auth(&settings.api_key)
            .json(&serde_json::json!({ "messages": history }))
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        // The endpoint replies either `{"answer": "..."}` or plain text.
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => Ok(value
                .get("answer")
                .and_then(|a| a.as_str())
                .map(str::to_string)
                .unwrap_or(body)),
            Err(_) => Ok(body),
        }
    }

    async fn create_thread(
        &self,
        settings: &AssistantEndpointSettings,
    ) -> Result<String, EndpointError> {
        let url = format!("{}/threads", settings.api_url.trim_end_matches('/'));
        debug!(url = %url, "Creating assistant thread");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EndpointError::MalformedReply(e.to_string()))?;

        value
            .get("thread_id")
            .or_else(|| value.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                EndpointError::MalformedReply("create-thread reply carries no thread id".into())
            })
    }

    async fn run_thread(
        &self,
        settings: &AssistantEndpointSettings,
        thread_id: &str,
        message: &str,
    ) -> Result<mpsc::Receiver<Result<String, EndpointError>>, EndpointError> {
        let url = format!("{}/runs", settings.api_url.trim_end_matches('/'));
        debug!(url = %url, thread_id = %thread_id, "Running assistant thread");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&serde_json::json!({ "thread_id": thread_id, "message": message }))
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let (tx, rx) = mpsc::channel(16);

        // Forward the line-delimited body; each line is one chunk.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(EndpointError::Network(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if !line.is_empty() && tx.send(Ok(line)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            // Flush a trailing unterminated line.
            let trailing = buffer.trim_end();
            if !trailing.is_empty() {
                let _ = tx.send(Ok(trailing.to_string())).await;
            }
        });

        Ok(rx)
    }
}

/// External-endpoint chat, v1: one stateless JSON round trip, returned as a
/// single terminal chunk. The default streaming implementation on the trait
/// provides exactly that wire behavior.
pub struct EndpointChat {
    backend: Arc<dyn AssistantBackend>,
}

impl EndpointChat {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ChatApproach for EndpointChat {
    fn kind(&self) -> ApproachKind {
        ApproachKind::EndpointStateless
    }

    async fn reply(
        &self,
        _user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        request.validate()?;
        let settings = profile.assistant_endpoint()?;

        let answer = self.backend.chat(settings, &request.history).await?;

        Ok(assembler::external_response(request, answer, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approach::collect_final;
    use crate::approaches::test_helpers::*;

    #[tokio::test]
    async fn forwards_history_and_wraps_answer() {
        let backend = scripted_backend("remote says hi");
        let endpoint = EndpointChat::new(backend.clone());

        let request = endpoint_request("hello");
        let response = endpoint
            .reply(&test_user(), &endpoint_profile(), &request)
            .await
            .unwrap();

        assert_eq!(response.answer, "remote says hi");
        assert!(response.diagnostics.is_none());
        assert_eq!(response.message_id, request.chat_turn_id);
        assert_eq!(backend.chat_calls(), 1);
        assert_eq!(backend.last_history_len(), 1);
    }

    #[tokio::test]
    async fn streaming_is_one_terminal_chunk() {
        let backend = scripted_backend("remote answer");
        let endpoint = EndpointChat::new(backend);

        let mut rx = endpoint
            .reply_streaming(&test_user(), &endpoint_profile(), &endpoint_request("hi"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.is_terminal());
        assert_eq!(first.final_result.unwrap().answer, "remote answer");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn profile_without_endpoint_is_config_error() {
        let backend = scripted_backend("x");
        let endpoint = EndpointChat::new(backend);

        let mut profile = endpoint_profile();
        profile.assistant_endpoint = None;

        let err = endpoint
            .reply(&test_user(), &profile, &endpoint_request("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let backend = failing_backend();
        let endpoint = EndpointChat::new(backend);

        let err = endpoint
            .reply(&test_user(), &endpoint_profile(), &endpoint_request("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Endpoint(_)));
    }

    #[tokio::test]
    async fn collect_final_on_endpoint_stream() {
        let backend = scripted_backend("whole answer");
        let endpoint = EndpointChat::new(backend);

        let rx = endpoint
            .reply_streaming(&test_user(), &endpoint_profile(), &endpoint_request("hi"))
            .await
            .unwrap();
        let response = collect_final(rx).await.unwrap();
        assert_eq!(response.answer, "whole answer");
    }
}
