//! OpenAI-compatible completion client.
//!
//! Works with any backend exposing the `/v1/chat/completions` and
//! `/v1/embeddings` shape. Supports:
//! - Non-streaming completions with wall-clock duration and usage capture
//! - Streaming SSE completions delivered as plain text deltas
//! - Query embeddings
//! - Content-policy rejection surfaced as data, not as an error

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace, warn};

use citeflow_core::error::CompletionError;
use citeflow_core::model::{
    ChatMessage, ChatModel, ChatRole, Completion, CompletionRequest, TextDelta, Usage,
};

/// A chat model served by an OpenAI-compatible deployment.
pub struct OpenAiCompatClient {
    deployment: String,
    base_url: String,
    api_key: String,
    embedding_deployment: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        deployment: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        Ok(Self {
            deployment: deployment.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_deployment: None,
            client,
        })
    }

    /// Enable the embedding capability through the named deployment.
    pub fn with_embedding_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.embedding_deployment = Some(deployment.into());
        self
    }

    /// Convert our message types to the wire format. Messages carrying
    /// images become content-part arrays; plain messages stay strings.
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                let content = if m.image_urls.is_empty() {
                    ApiContent::Text(m.content.clone())
                } else {
                    let mut parts = vec![ApiContentPart::Text {
                        text: m.content.clone(),
                    }];
                    parts.extend(m.image_urls.iter().map(|url| ApiContentPart::ImageUrl {
                        image_url: ApiImageUrl { url: url.clone() },
                    }));
                    ApiContent::Parts(parts)
                };
                ApiMessage {
                    role: role.into(),
                    content,
                }
            })
            .collect()
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.deployment,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    /// Map a non-200 status to an error, except the content-filter 400,
    /// which the caller turns into a filtered completion.
    fn classify_failure(status: u16, body: &str) -> FailureKind {
        if status == 400 && body.contains("content_filter") {
            return FailureKind::ContentFiltered;
        }
        if status == 429 {
            return FailureKind::Error(CompletionError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return FailureKind::Error(CompletionError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        FailureKind::Error(CompletionError::ApiError {
            status_code: status,
            message: body.to_string(),
        })
    }
}

enum FailureKind {
    ContentFiltered,
    Error(CompletionError),
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    fn deployment(&self) -> &str {
        &self.deployment
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request, false);

        debug!(deployment = %self.deployment, "Sending completion request");
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            match Self::classify_failure(status, &error_body) {
                FailureKind::ContentFiltered => {
                    debug!(deployment = %self.deployment, "Input rejected by content policy");
                    return Ok(Completion {
                        answer: String::new(),
                        usage: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        model: self.deployment.clone(),
                        filtered: true,
                    });
                }
                FailureKind::Error(err) => {
                    warn!(status, body = %error_body, "Completion backend returned error");
                    return Err(err);
                }
            }
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| CompletionError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let duration_ms = started.elapsed().as_millis() as u64;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| CompletionError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let filtered = choice.finish_reason.as_deref() == Some("content_filter");

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(Completion {
            answer: choice.message.and_then(|m| m.content).unwrap_or_default(),
            usage,
            duration_ms,
            model: api_response.model,
            filtered,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<TextDelta, CompletionError>>,
        CompletionError,
    > {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request, true);

        debug!(deployment = %self.deployment, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return match Self::classify_failure(status, &error_body) {
                // A filtered stream never starts; surface it as one
                // empty-usage channel the consumer sees close immediately.
                FailureKind::ContentFiltered => {
                    let (_tx, rx) = tokio::sync::mpsc::channel(1);
                    Ok(rx)
                }
                FailureKind::Error(err) => {
                    warn!(status, body = %error_body, "Streaming backend returned error");
                    Err(err)
                }
            };
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let deployment = self.deployment.clone();

        // Read the SSE byte stream and forward text deltas. The receiver
        // dropping is the consumer's cancellation signal: the first failed
        // send stops the reader.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(CompletionError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(stream_resp) => {
                            if let Some(choice) = stream_resp.choices.first() {
                                if let Some(content) = &choice.delta.content {
                                    if !content.is_empty()
                                        && tx.send(Ok(TextDelta::text(content))).await.is_err()
                                    {
                                        return; // receiver dropped
                                    }
                                }
                            }

                            if let Some(usage) = stream_resp.usage {
                                let _ = tx
                                    .send(Ok(TextDelta::usage(Usage {
                                        prompt_tokens: usage.prompt_tokens,
                                        completion_tokens: usage.completion_tokens,
                                        total_tokens: usage.total_tokens,
                                    })))
                                    .await;
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                deployment = %deployment,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        texts: Vec<String>,
    ) -> std::result::Result<Vec<Vec<f32>>, CompletionError> {
        let Some(embedding_deployment) = &self.embedding_deployment else {
            return Err(CompletionError::NotConfigured(format!(
                "Deployment '{}' has no embedding deployment configured",
                self.deployment
            )));
        };

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": embedding_deployment,
            "input": texts,
            "encoding_format": "float",
        });

        debug!(
            deployment = %embedding_deployment,
            count = body["input"].as_array().map(|a| a.len()).unwrap_or(0),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return match Self::classify_failure(status, &error_body) {
                FailureKind::ContentFiltered => Err(CompletionError::ApiError {
                    status_code: status,
                    message: error_body,
                }),
                FailureKind::Error(err) => Err(err),
            };
        }

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| CompletionError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        Ok(api_resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Option<ApiResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_serializes_as_string_content() {
        let msgs = OpenAiCompatClient::to_api_messages(&[ChatMessage::user("Hello")]);
        let json = serde_json::to_string(&msgs).unwrap();
        assert!(json.contains(r#""content":"Hello""#));
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn image_message_serializes_as_parts() {
        let msg = ChatMessage::user("look at this").with_image("data:image/png;base64,AAAA");
        let json = serde_json::to_string(&OpenAiCompatClient::to_api_messages(&[msg])).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""type":"image_url""#));
        assert!(json.contains("data:image/png;base64,AAAA"));
    }

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_completion_response() {
        let data = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"content": "The answer [manual.pdf]."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(
            parsed.choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("The answer [manual.pdf].")
        );
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn content_filter_status_is_distinguished() {
        let kind = OpenAiCompatClient::classify_failure(
            400,
            r#"{"error":{"code":"content_filter","message":"filtered"}}"#,
        );
        assert!(matches!(kind, FailureKind::ContentFiltered));
    }

    #[test]
    fn rate_limit_maps_to_error() {
        let kind = OpenAiCompatClient::classify_failure(429, "slow down");
        assert!(matches!(
            kind,
            FailureKind::Error(CompletionError::RateLimited { .. })
        ));
    }

    #[test]
    fn auth_failure_maps_to_error() {
        let kind = OpenAiCompatClient::classify_failure(401, "no");
        assert!(matches!(
            kind,
            FailureKind::Error(CompletionError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn parse_embedding_response() {
        let data = r#"{"data":[{"embedding":[0.1,0.2,0.3]},{"embedding":[0.4,0.5,0.6]}]}"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }
}
