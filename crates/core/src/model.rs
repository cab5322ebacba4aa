//! ChatModel trait — the abstraction over chat-completion backends.
//!
//! A ChatModel knows how to send a rendered conversation to a model
//! deployment and get an answer back, either as a complete message or as a
//! stream of text deltas. It also exposes the embedding capability the
//! retriever depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CompletionError;

/// The role of a message sender in a rendered conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single rendered message handed to a model deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,

    /// The text content.
    pub content: String,

    /// Image attachments as data URLs, appended to the content parts for
    /// multimodal deployments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            image_urls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            image_urls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            image_urls: Vec::new(),
        }
    }

    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image_urls.push(data_url.into());
        self
    }
}

/// Configuration for one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The rendered conversation.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) model answer.
///
/// Content-policy rejection is carried as data (`filtered`), not as an
/// error: the orchestrator decides how to surface it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text; empty when `filtered` is set.
    pub answer: String,

    /// Token usage, when the backend reports it.
    pub usage: Option<Usage>,

    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,

    /// Which deployment actually answered.
    pub model: String,

    /// Set when the backend's content-management policy rejected the input.
    #[serde(default)]
    pub filtered: bool,
}

/// A single text delta in a streaming response.
///
/// Stream completion is signaled by channel closure, not by a marker delta;
/// a usage-bearing delta (empty text) may arrive last when the backend
/// reports stream usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    pub fn usage(usage: Usage) -> Self {
        Self {
            text: String::new(),
            usage: Some(usage),
        }
    }
}

/// The core ChatModel trait.
///
/// Every model backend implements this trait; the orchestrator calls
/// `complete()` or `stream()` without knowing which deployment is in use.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// The deployment name this model answers as (shows up in diagnostics).
    fn deployment(&self) -> &str;

    /// Send a request and get a complete answer with timing and usage.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, CompletionError>;

    /// Send a request and get a lazy, finite, non-restartable sequence of
    /// text deltas. The consumer cancels by dropping the receiver; producers
    /// observe that between deltas, never mid-delta.
    ///
    /// Default implementation calls `complete()` and emits its answer as a
    /// single delta.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<TextDelta, CompletionError>>,
        CompletionError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let usage = response.usage.clone();
        let _ = tx.send(Ok(TextDelta::text(response.answer))).await;
        if let Some(usage) = usage {
            let _ = tx.send(Ok(TextDelta::usage(usage))).await;
        }
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation reports the capability as absent.
    async fn embed(
        &self,
        _texts: Vec<String>,
    ) -> std::result::Result<Vec<Vec<f32>>, CompletionError> {
        Err(CompletionError::NotConfigured(format!(
            "Deployment '{}' does not support embeddings",
            self.deployment()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel;

    #[async_trait]
    impl ChatModel for FixedModel {
        fn deployment(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<Completion, CompletionError> {
            Ok(Completion {
                answer: "hello".into(),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 1,
                    total_tokens: 4,
                }),
                duration_ms: 1,
                model: "fixed".into(),
                filtered: false,
            })
        }
    }

    #[test]
    fn completion_request_defaults() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn message_with_image_accumulates() {
        let msg = ChatMessage::user("look").with_image("data:image/png;base64,AAAA");
        assert_eq!(msg.image_urls.len(), 1);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let model = FixedModel;
        let mut rx = model
            .stream(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.text, "hello");

        let second = rx.recv().await.unwrap().unwrap();
        assert!(second.text.is_empty());
        assert_eq!(second.usage.unwrap().total_tokens, 4);

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn default_embed_is_not_configured() {
        let model = FixedModel;
        let err = model.embed(vec!["text".into()]).await.unwrap_err();
        assert!(matches!(err, CompletionError::NotConfigured(_)));
    }
}
