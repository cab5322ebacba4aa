//! Shared test helpers for strategy tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use citeflow_completion::ModelTiers;
use citeflow_config::{
    AssistantEndpointSettings, ProfileDefinition, RagSettings, SecurityModel,
};
use citeflow_core::chat::{Approach, ChatRequest, ChatTurn, RequestOptions, UserInformation};
use citeflow_core::error::{CompletionError, EndpointError};
use citeflow_core::knowledge::IndexDocument;
use citeflow_core::model::{ChatModel, Completion, CompletionRequest, TextDelta, Usage};
use citeflow_retrieval::{InMemoryIndex, KnowledgeRetriever};

// ── Scripted chat model ───────────────────────────────────────────────────

/// A mock model that returns scripted completions in order and plays one
/// scripted delta sequence per stream call. Panics when more completions
/// are requested than scripted, so tests catch unexpected model calls.
pub struct ScriptedModel {
    completions: Mutex<VecDeque<Completion>>,
    stream_deltas: Mutex<Vec<String>>,
    fail_stream: Option<String>,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    deltas_pulled: Arc<AtomicUsize>,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedModel {
    fn build(
        completions: Vec<Completion>,
        deltas: Vec<&str>,
        fail_stream: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(completions.into()),
            stream_deltas: Mutex::new(deltas.into_iter().map(String::from).collect()),
            fail_stream,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            deltas_pulled: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
        })
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Deltas the consumer actually accepted from a stream call.
    pub fn deltas_pulled(&self) -> usize {
        self.deltas_pulled.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn deployment(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, CompletionError> {
        *self.last_request.lock().unwrap() = Some(request);
        self.complete_calls.fetch_add(1, Ordering::SeqCst);

        let completion = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedModel: no scripted completion left"));
        Ok(completion)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<Result<TextDelta, CompletionError>>, CompletionError> {
        *self.last_request.lock().unwrap() = Some(request);
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.fail_stream {
            let (tx, rx) = mpsc::channel(1);
            let message = message.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(Err(CompletionError::StreamInterrupted(message)))
                    .await;
            });
            return Ok(rx);
        }

        let deltas = self.stream_deltas.lock().unwrap().clone();
        let pulled = self.deltas_pulled.clone();

        // Capacity 1 keeps delivery lazy: a send only succeeds when the
        // consumer is still pulling, which is what the cancellation tests
        // measure.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(TextDelta::text(delta))).await.is_err() {
                    return;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
            }
            let _ = tx
                .send(Ok(TextDelta::usage(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                })))
                .await;
        });
        Ok(rx)
    }
}

pub fn scripted_model(completions: Vec<Completion>) -> Arc<ScriptedModel> {
    ScriptedModel::build(completions, vec![], None)
}

pub fn scripted_model_with_stream(
    completions: Vec<Completion>,
    deltas: Vec<&str>,
) -> Arc<ScriptedModel> {
    ScriptedModel::build(completions, deltas, None)
}

pub fn scripted_model_with_failing_stream(
    completions: Vec<Completion>,
    message: &str,
) -> Arc<ScriptedModel> {
    ScriptedModel::build(completions, vec![], Some(message.to_string()))
}

pub fn text_completion(text: &str) -> Completion {
    Completion {
        answer: text.into(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        duration_ms: 7,
        model: "scripted".into(),
        filtered: false,
    }
}

pub fn filtered_completion() -> Completion {
    Completion {
        answer: String::new(),
        usage: None,
        duration_ms: 3,
        model: "scripted".into(),
        filtered: true,
    }
}

/// Both tiers backed by the same scripted model.
pub fn tiers_for(model: Arc<ScriptedModel>) -> Arc<ModelTiers> {
    Arc::new(ModelTiers::new(model.clone(), model))
}

// ── Retriever fixtures ────────────────────────────────────────────────────

/// Embedder returning a fixed unit vector for any input.
struct FixedEmbedder;

#[async_trait]
impl ChatModel for FixedEmbedder {
    fn deployment(&self) -> &str {
        "fixed-embedder"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<Completion, CompletionError> {
        unreachable!("embedder never completes")
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CompletionError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

pub fn source(sourcefile: &str, text: &str) -> IndexDocument {
    IndexDocument::Chunk {
        chunk_id: format!("{sourcefile}-0"),
        sourcefile: sourcefile.into(),
        chunk_text: text.into(),
        user_id: None,
        session_id: None,
        score: 0.0,
    }
}

pub fn owned_source(
    sourcefile: &str,
    text: &str,
    user_id: &str,
    session_id: &str,
) -> IndexDocument {
    IndexDocument::Chunk {
        chunk_id: format!("{sourcefile}-0"),
        sourcefile: sourcefile.into(),
        chunk_text: text.into(),
        user_id: Some(user_id.into()),
        session_id: Some(session_id.into()),
        score: 0.0,
    }
}

/// A retriever over one in-memory "manuals" index holding `docs`.
pub async fn retriever_with_sources(docs: Vec<IndexDocument>) -> Arc<KnowledgeRetriever> {
    let index = InMemoryIndex::new("manuals");
    for doc in docs {
        index.insert(vec![1.0, 0.0, 0.0], doc).await;
    }
    let mut retriever = KnowledgeRetriever::new(Arc::new(FixedEmbedder));
    retriever.register(Arc::new(index));
    Arc::new(retriever)
}

// ── Scripted assistant backend ────────────────────────────────────────────

pub struct ScriptedBackend {
    chat_answer: String,
    lines: Vec<String>,
    fail: bool,
    chat_calls: AtomicUsize,
    create_calls: AtomicUsize,
    run_calls: AtomicUsize,
    last_history_len: AtomicUsize,
    last_thread_id: Mutex<Option<String>>,
}

impl ScriptedBackend {
    fn build(chat_answer: &str, lines: Vec<&str>, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            chat_answer: chat_answer.into(),
            lines: lines.into_iter().map(String::from).collect(),
            fail,
            chat_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            last_history_len: AtomicUsize::new(0),
            last_thread_id: Mutex::new(None),
        })
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn create_thread_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn last_history_len(&self) -> usize {
        self.last_history_len.load(Ordering::SeqCst)
    }

    pub fn last_thread_id(&self) -> Option<String> {
        self.last_thread_id.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::approaches::endpoint::AssistantBackend for ScriptedBackend {
    async fn chat(
        &self,
        _settings: &AssistantEndpointSettings,
        history: &[ChatTurn],
    ) -> Result<String, EndpointError> {
        if self.fail {
            return Err(EndpointError::Network("scripted failure".into()));
        }
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.last_history_len.store(history.len(), Ordering::SeqCst);
        Ok(self.chat_answer.clone())
    }

    async fn create_thread(
        &self,
        _settings: &AssistantEndpointSettings,
    ) -> Result<String, EndpointError> {
        if self.fail {
            return Err(EndpointError::Network("scripted failure".into()));
        }
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread-{n}"))
    }

    async fn run_thread(
        &self,
        _settings: &AssistantEndpointSettings,
        thread_id: &str,
        _message: &str,
    ) -> Result<mpsc::Receiver<Result<String, EndpointError>>, EndpointError> {
        if self.fail {
            return Err(EndpointError::Network("scripted failure".into()));
        }
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_thread_id.lock().unwrap() = Some(thread_id.to_string());

        let lines = self.lines.clone();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for line in lines {
                if tx.send(Ok(line)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

pub fn scripted_backend(answer: &str) -> Arc<ScriptedBackend> {
    ScriptedBackend::build(answer, vec![], false)
}

pub fn scripted_backend_with_lines(lines: Vec<&str>) -> Arc<ScriptedBackend> {
    ScriptedBackend::build("", lines, false)
}

pub fn failing_backend() -> Arc<ScriptedBackend> {
    ScriptedBackend::build("", vec![], true)
}

// ── Domain fixtures ───────────────────────────────────────────────────────

pub fn test_user() -> UserInformation {
    UserInformation::new("u1", "Test User", "s1")
}

fn base_request(question: &str, approach: Approach) -> ChatRequest {
    ChatRequest {
        chat_id: Uuid::new_v4(),
        chat_turn_id: Uuid::new_v4(),
        history: vec![ChatTurn::question(question)],
        selected_files: vec![],
        attachments: vec![],
        approach,
        options: RequestOptions::default(),
        overrides: None,
    }
}

pub fn rag_request(question: &str) -> ChatRequest {
    base_request(question, Approach::Rag)
}

pub fn chat_request(question: &str) -> ChatRequest {
    base_request(question, Approach::Chat)
}

pub fn endpoint_request(question: &str) -> ChatRequest {
    base_request(question, Approach::EndpointThread)
}

pub fn rag_profile() -> ProfileDefinition {
    ProfileDefinition {
        name: "Manuals".into(),
        approach: Approach::Rag,
        security_model: SecurityModel::None,
        rag_settings: Some(RagSettings {
            index_name: "manuals".into(),
            document_files_count: 5,
            k_nearest_neighbors_count: 3,
            max_source_tokens: 2048,
            citation_base_url: "https://docs.example.com".into(),
        }),
        assistant_endpoint: None,
        sample_questions: vec![],
        chat_system_message_file: None,
    }
}

pub fn chat_profile() -> ProfileDefinition {
    ProfileDefinition {
        name: "General".into(),
        approach: Approach::Chat,
        security_model: SecurityModel::None,
        rag_settings: None,
        assistant_endpoint: None,
        sample_questions: vec![],
        chat_system_message_file: None,
    }
}

pub fn endpoint_profile() -> ProfileDefinition {
    ProfileDefinition {
        name: "Remote".into(),
        approach: Approach::Endpoint,
        security_model: SecurityModel::None,
        rag_settings: None,
        assistant_endpoint: Some(AssistantEndpointSettings {
            api_url: "https://assistant.example.com".into(),
            api_key: "test-key".into(),
        }),
        sample_questions: vec![],
        chat_system_message_file: None,
    }
}

pub fn endpoint_thread_profile() -> ProfileDefinition {
    ProfileDefinition {
        name: "Remote Threads".into(),
        approach: Approach::EndpointThread,
        security_model: SecurityModel::None,
        rag_settings: None,
        assistant_endpoint: Some(AssistantEndpointSettings {
            api_url: "https://assistant.example.com".into(),
            api_key: "test-key".into(),
        }),
        sample_questions: vec![],
        chat_system_message_file: None,
    }
}
