//! External assistant endpoint, v2: threaded and stateful.
//!
//! The service issues a `thread_id` per chat session. The cache maps
//! `chat_id → thread_id` with insert-if-absent semantics: concurrent first
//! turns for one chat id race to a single per-chat `OnceCell`, so exactly
//! one create-thread call runs. Thread ids live only in process memory and
//! do not survive restarts, matching the upstream service's session model.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info};
use uuid::Uuid;

use citeflow_config::{AssistantEndpointSettings, ProfileDefinition};
use citeflow_core::chat::{ChatRequest, UserInformation};
use citeflow_core::error::{EndpointError, Error};
use citeflow_core::response::{ApproachResponse, ChatChunkResponse};

use crate::approach::{collect_final, ApproachKind, ChatApproach, ChunkReceiver};
use crate::approaches::endpoint::AssistantBackend;
use crate::assembler;

/// Session-scoped `chat_id → thread_id` cache.
pub struct ThreadCache {
    inner: Mutex<HashMap<Uuid, Arc<OnceCell<String>>>>,
}

impl ThreadCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Get the thread id for a chat, creating it through `backend` at most
    /// once per chat id even under concurrent first turns.
    pub async fn get_or_create(
        &self,
        chat_id: Uuid,
        backend: &Arc<dyn AssistantBackend>,
        settings: &AssistantEndpointSettings,
    ) -> Result<String, EndpointError> {
        let cell = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let thread_id = cell
            .get_or_try_init(|| async {
                info!(chat_id = %chat_id, "Creating assistant thread");
                backend.create_thread(settings).await
            })
            .await?;

        Ok(thread_id.clone())
    }
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

/// External-endpoint chat, v2: reuses a server-side thread per chat session
/// and forwards the run reply line by line.
pub struct ThreadedEndpointChat {
    backend: Arc<dyn AssistantBackend>,
    threads: ThreadCache,
}

impl ThreadedEndpointChat {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self {
            backend,
            threads: ThreadCache::new(),
        }
    }
}

#[async_trait]
impl ChatApproach for ThreadedEndpointChat {
    fn kind(&self) -> ApproachKind {
        ApproachKind::EndpointThreaded
    }

    async fn reply(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        collect_final(self.reply_streaming(user, profile, request).await?).await
    }

    async fn reply_streaming(
        &self,
        _user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, Error> {
        request.validate()?;
        let settings = profile.assistant_endpoint()?.clone();

        let question = request
            .question()
            .ok_or_else(|| Error::InvalidRequest("history must be non-empty".into()))?
            .to_string();

        let thread_id = self
            .threads
            .get_or_create(request.chat_id, &self.backend, &settings)
            .await?;
        debug!(thread_id = %thread_id, "Using assistant thread");

        let backend = self.backend.clone();
        let request = request.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut lines = match backend.run_thread(&settings, &thread_id, &question).await {
                Ok(lines) => lines,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let mut answer = String::new();
            while let Some(item) = lines.recv().await {
                match item {
                    Ok(line) => {
                        if !answer.is_empty() {
                            answer.push('\n');
                        }
                        answer.push_str(&line);
                        if tx
                            .send(Ok(ChatChunkResponse::delta(line.as_str())))
                            .await
                            .is_err()
                        {
                            return; // cancelled
                        }
                        tokio::task::yield_now().await;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            let thoughts = Some(format!("Assistant thread: {thread_id}"));
            let response = assembler::external_response(&request, answer, thoughts);
            let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approaches::test_helpers::*;
    use citeflow_core::chat::ChatTurn;

    #[tokio::test]
    async fn forwards_lines_then_terminal_with_thoughts() {
        let backend = scripted_backend_with_lines(vec!["line one", "line two"]);
        let chat = ThreadedEndpointChat::new(backend);

        let mut rx = chat
            .reply_streaming(&test_user(), &endpoint_thread_profile(), &endpoint_request("q"))
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(item) = rx.recv().await {
            chunks.push(item.unwrap());
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "line one");
        assert_eq!(chunks[1].text, "line two");

        let final_result = chunks[2].final_result.as_ref().unwrap();
        assert_eq!(final_result.answer, "line one\nline two");
        assert_eq!(
            final_result.thoughts.as_deref(),
            Some("Assistant thread: thread-1")
        );
        assert!(final_result.diagnostics.is_none());
    }

    #[tokio::test]
    async fn second_turn_reuses_the_thread() {
        let backend = scripted_backend_with_lines(vec!["reply"]);
        let chat = ThreadedEndpointChat::new(backend.clone());
        let profile = endpoint_thread_profile();

        let mut first = endpoint_request("first question");
        first.history = vec![ChatTurn::question("first question")];

        let mut second = endpoint_request("second question");
        second.chat_id = first.chat_id; // same session
        second.history = vec![
            ChatTurn::answered("first question", "reply"),
            ChatTurn::question("second question"),
        ];

        chat.reply(&test_user(), &profile, &first).await.unwrap();
        chat.reply(&test_user(), &profile, &second).await.unwrap();

        assert_eq!(backend.create_thread_calls(), 1);
        assert_eq!(backend.run_calls(), 2);
        assert_eq!(backend.last_thread_id().as_deref(), Some("thread-1"));
    }

    #[tokio::test]
    async fn distinct_chats_get_distinct_threads() {
        let backend = scripted_backend_with_lines(vec!["reply"]);
        let chat = ThreadedEndpointChat::new(backend.clone());
        let profile = endpoint_thread_profile();

        chat.reply(&test_user(), &profile, &endpoint_request("a"))
            .await
            .unwrap();
        chat.reply(&test_user(), &profile, &endpoint_request("b"))
            .await
            .unwrap();

        assert_eq!(backend.create_thread_calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_turns_create_one_thread() {
        let backend = scripted_backend_with_lines(vec!["reply"]);
        let chat = Arc::new(ThreadedEndpointChat::new(backend.clone()));
        let profile = endpoint_thread_profile();

        let request = endpoint_request("hello");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let chat = chat.clone();
            let profile = profile.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                chat.reply(&test_user(), &profile, &request).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.create_thread_calls(), 1);
        assert_eq!(backend.run_calls(), 8);
    }

    #[tokio::test]
    async fn create_thread_failure_propagates() {
        let backend = failing_backend();
        let chat = ThreadedEndpointChat::new(backend);

        let err = chat
            .reply_streaming(&test_user(), &endpoint_thread_profile(), &endpoint_request("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Endpoint(_)));
    }
}
