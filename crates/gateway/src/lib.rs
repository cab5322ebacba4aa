//! HTTP gateway for the Citeflow chat backend.
//!
//! Endpoints:
//!
//! - `POST /chat`        — Run a turn, get one `ApproachResponse`
//! - `POST /chat/stream` — Run a turn, get SSE `ChatChunkResponse` events
//! - `POST /chat/rating` — Attach a rating to a recorded turn
//! - `GET  /profiles`    — Profile names and sample questions for pickers
//! - `POST /documents`   — Upload side-channel (store + acknowledge)
//! - `GET  /status`      — Uptime and catalog summary

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use citeflow_config::{ProfileCatalog, ProfileDefinition};
use citeflow_core::chat::{ChatRatingRequest, ChatRequest, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::response::ApproachResponse;
use citeflow_orchestrator::attachments::decode_data_url;
use citeflow_orchestrator::StrategySet;

pub mod history;

pub use history::{DocumentStore, HistoryRecorder, InMemoryDocumentStore, InMemoryHistory};

// ── State ─────────────────────────────────────────────────────────────────

pub struct GatewayState {
    pub catalog: ProfileCatalog,
    pub strategies: StrategySet,
    pub history: Arc<dyn HistoryRecorder>,
    pub documents: Arc<dyn DocumentStore>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<GatewayState>;

// ── Router ────────────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat/rating", post(rating_handler))
        .route("/profiles", get(list_profiles_handler))
        .route("/documents", post(upload_document_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatCall {
    /// Resolved upstream in a real deployment; optional here.
    #[serde(default)]
    user: Option<UserInformation>,

    #[serde(flatten)]
    request: ChatRequest,
}

#[derive(Deserialize)]
struct RatingCall {
    #[serde(default)]
    user: Option<UserInformation>,

    #[serde(flatten)]
    rating: ChatRatingRequest,
}

#[derive(Deserialize)]
struct DocumentUpload {
    name: String,
    data_url: String,
}

#[derive(Serialize)]
struct DocumentUploadResponse {
    blob_id: String,
    ingestion: &'static str,
}

#[derive(Serialize)]
struct ProfileSummary {
    name: String,
    approach: String,
    sample_questions: Vec<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_secs: i64,
    profiles: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_error(e: Error) -> ApiError {
    let status = match &e {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Completion(_) | Error::Retrieval(_) | Error::Endpoint(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

/// A request without a resolved user runs as the anonymous session user.
fn resolve_user(user: Option<UserInformation>, request: &ChatRequest) -> UserInformation {
    user.unwrap_or_else(|| {
        UserInformation::new("anonymous", "Anonymous", request.chat_id.to_string())
    })
}

fn resolve_profile<'a>(
    state: &'a GatewayState,
    request: &ChatRequest,
) -> Result<&'a ProfileDefinition, ApiError> {
    let profile = match &request.options.profile {
        Some(name) => state
            .catalog
            .get(name)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown profile '{name}'")))?,
        None => state.catalog.default_profile(),
    };

    if profile.approach != request.approach {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "request declares approach '{}' but profile '{}' is '{}'",
                request.approach, profile.name, profile.approach
            ),
        ));
    }

    Ok(profile)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(call): Json<ChatCall>,
) -> Result<Json<ApproachResponse>, ApiError> {
    let request = call.request;
    request.validate().map_err(map_error)?;

    let profile = resolve_profile(&state, &request)?;
    let user = resolve_user(call.user, &request);

    info!(profile = %profile.name, chat_id = %request.chat_id, "chat request");

    let strategy = state.strategies.resolve(profile, &request.options);
    let response = strategy
        .reply(&user, profile, &request)
        .await
        .map_err(map_error)?;

    if let Err(e) = state.history.record(&user, &request, &response).await {
        warn!("Failed to record chat turn: {e}");
    }

    Ok(Json(response))
}

async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(call): Json<ChatCall>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let request = call.request;
    request.validate().map_err(map_error)?;

    let profile = resolve_profile(&state, &request)?.clone();
    let user = resolve_user(call.user, &request);

    info!(profile = %profile.name, chat_id = %request.chat_id, "chat stream request");

    let strategy = state.strategies.resolve(&profile, &request.options);
    let rx = strategy
        .reply_streaming(&user, &profile, &request)
        .await
        .map_err(map_error)?;

    let history = state.history.clone();
    let stream = ReceiverStream::new(rx).map(move |item| {
        let event = match item {
            Ok(chunk) => {
                if let Some(final_result) = &chunk.final_result {
                    let history = history.clone();
                    let user = user.clone();
                    let request = request.clone();
                    let final_result = final_result.clone();
                    tokio::spawn(async move {
                        if let Err(e) = history.record(&user, &request, &final_result).await {
                            warn!("Failed to record streamed turn: {e}");
                        }
                    });
                }
                let data = serde_json::to_string(&chunk).unwrap_or_default();
                SseEvent::default().event("chunk").data(data)
            }
            Err(e) => {
                warn!("Chat stream failed: {e}");
                let data = serde_json::to_string(&ErrorResponse {
                    error: e.to_string(),
                })
                .unwrap_or_default();
                SseEvent::default().event("error").data(data)
            }
        };
        Ok(event)
    });

    Ok(Sse::new(stream))
}

async fn rating_handler(
    State(state): State<SharedState>,
    Json(call): Json<RatingCall>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = call.user.unwrap_or_else(|| {
        UserInformation::new("anonymous", "Anonymous", call.rating.chat_id.to_string())
    });

    state
        .history
        .rate(&user, &call.rating)
        .await
        .map_err(map_error)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn list_profiles_handler(State(state): State<SharedState>) -> Json<Vec<ProfileSummary>> {
    let profiles = state
        .catalog
        .profiles()
        .iter()
        .map(|p| ProfileSummary {
            name: p.name.clone(),
            approach: p.approach.to_string(),
            sample_questions: p.sample_questions.clone(),
        })
        .collect();
    Json(profiles)
}

async fn upload_document_handler(
    State(state): State<SharedState>,
    Json(upload): Json<DocumentUpload>,
) -> Result<(StatusCode, Json<DocumentUploadResponse>), ApiError> {
    let decoded = decode_data_url(&upload.data_url).map_err(map_error)?;

    let blob_id = state
        .documents
        .store(&upload.name, decoded.bytes)
        .await
        .map_err(map_error)?;

    // The ingestion pipeline itself runs outside this service.
    info!(blob_id = %blob_id, "Document stored, ingestion triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentUploadResponse {
            blob_id,
            ingestion: "triggered",
        }),
    ))
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        profiles: state.catalog.profiles().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use citeflow_completion::ModelTiers;
    use citeflow_core::error::CompletionError;
    use citeflow_core::model::{ChatModel, Completion, CompletionRequest, Usage};
    use citeflow_orchestrator::{AssistantBackend, Utf8TextExtraction};
    use citeflow_retrieval::{InMemoryIndex, KnowledgeRetriever};

    struct CannedModel;

    #[async_trait]
    impl ChatModel for CannedModel {
        fn deployment(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<Completion, CompletionError> {
            Ok(Completion {
                answer: "canned answer".into(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                duration_ms: 2,
                model: "canned".into(),
                filtered: false,
            })
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CompletionError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct NoBackend;

    #[async_trait]
    impl AssistantBackend for NoBackend {
        async fn chat(
            &self,
            _settings: &citeflow_config::AssistantEndpointSettings,
            _history: &[citeflow_core::chat::ChatTurn],
        ) -> Result<String, citeflow_core::error::EndpointError> {
            Ok("remote".into())
        }

        async fn create_thread(
            &self,
            _settings: &citeflow_config::AssistantEndpointSettings,
        ) -> Result<String, citeflow_core::error::EndpointError> {
            Ok("thread-1".into())
        }

        async fn run_thread(
            &self,
            _settings: &citeflow_config::AssistantEndpointSettings,
            _thread_id: &str,
            _message: &str,
        ) -> Result<
            tokio::sync::mpsc::Receiver<Result<String, citeflow_core::error::EndpointError>>,
            citeflow_core::error::EndpointError,
        > {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }
    }

    fn test_state() -> (SharedState, Arc<InMemoryHistory>) {
        let catalog = ProfileCatalog::from_json(
            r#"[
                {"name": "General", "approach": "chat",
                 "sample_questions": ["What can you do?"]}
            ]"#,
        )
        .unwrap();

        let model: Arc<dyn ChatModel> = Arc::new(CannedModel);
        let tiers = Arc::new(ModelTiers::new(model.clone(), model.clone()));
        let mut retriever = KnowledgeRetriever::new(model);
        retriever.register(Arc::new(InMemoryIndex::new("manuals")));

        let strategies = StrategySet::new(
            tiers,
            Arc::new(retriever),
            Arc::new(NoBackend),
            Arc::new(Utf8TextExtraction),
            0.2,
        );

        let history = Arc::new(InMemoryHistory::new());
        let state = Arc::new(GatewayState {
            catalog,
            strategies,
            history: history.clone(),
            documents: Arc::new(InMemoryDocumentStore::new()),
            start_time: chrono::Utc::now(),
        });
        (state, history)
    }

    fn chat_body(question: &str) -> String {
        serde_json::json!({
            "chat_id": Uuid::new_v4(),
            "chat_turn_id": Uuid::new_v4(),
            "history": [{"user": question}],
            "approach": "chat",
        })
        .to_string()
    }

    async fn post_json(router: Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn chat_returns_response_and_records_history() {
        let (state, history) = test_state();
        let (status, body) = post_json(router(state), "/chat", chat_body("hello")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "canned answer");
        assert!(body["diagnostics"]["total_tokens"].as_u64().unwrap() > 0);
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn empty_history_is_bad_request() {
        let (state, _) = test_state();
        let body = serde_json::json!({
            "chat_id": Uuid::new_v4(),
            "chat_turn_id": Uuid::new_v4(),
            "history": [],
            "approach": "chat",
        })
        .to_string();

        let (status, _) = post_json(router(state), "/chat", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_profile_is_not_found() {
        let (state, _) = test_state();
        let body = serde_json::json!({
            "chat_id": Uuid::new_v4(),
            "chat_turn_id": Uuid::new_v4(),
            "history": [{"user": "hi"}],
            "approach": "chat",
            "options": {"profile": "missing"},
        })
        .to_string();

        let (status, _) = post_json(router(state), "/chat", body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approach_mismatch_is_bad_request() {
        let (state, _) = test_state();
        let body = serde_json::json!({
            "chat_id": Uuid::new_v4(),
            "chat_turn_id": Uuid::new_v4(),
            "history": [{"user": "hi"}],
            "approach": "rag",
        })
        .to_string();

        let (status, _) = post_json(router(state), "/chat", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rating_round_trip() {
        let (state, history) = test_state();
        let chat_id = Uuid::new_v4();
        let chat_turn_id = Uuid::new_v4();

        let body = serde_json::json!({
            "chat_id": chat_id,
            "chat_turn_id": chat_turn_id,
            "history": [{"user": "hello"}],
            "approach": "chat",
        })
        .to_string();
        let (status, _) = post_json(router(state.clone()), "/chat", body).await;
        assert_eq!(status, StatusCode::OK);

        let rating = serde_json::json!({
            "chat_id": chat_id,
            "chat_turn_id": chat_turn_id,
            "rating": "thumbs_up",
        })
        .to_string();
        let (status, body) = post_json(router(state), "/chat/rating", rating).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let record = history.find(chat_id, chat_turn_id).await.unwrap();
        assert_eq!(record.rating, Some(citeflow_core::chat::Rating::ThumbsUp));
    }

    #[tokio::test]
    async fn profiles_lists_catalog() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/profiles")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[0]["name"], "General");
        assert_eq!(value[0]["approach"], "chat");
    }

    #[tokio::test]
    async fn document_upload_is_accepted() {
        use base64::Engine;
        let (state, _) = test_state();
        let body = serde_json::json!({
            "name": "manual.pdf",
            "data_url": format!(
                "data:application/pdf;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(b"pdf bytes")
            ),
        })
        .to_string();

        let (status, value) = post_json(router(state), "/documents", body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(value["blob_id"].as_str().unwrap().ends_with("manual.pdf"));
        assert_eq!(value["ingestion"], "triggered");
    }

    #[tokio::test]
    async fn status_reports_catalog_size() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["profiles"], 1);
    }
}
