//! History recording — the persistence seam for completed turns.
//!
//! The orchestrator never reads this store mid-pipeline; the gateway hands
//! it each finished `ApproachResponse` and later rating events. The
//! in-memory implementation backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use citeflow_core::chat::{ChatRatingRequest, ChatRequest, Rating, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::response::ApproachResponse;

/// Maximum in-memory turn records before the oldest are evicted.
const MAX_TURNS: usize = 10_000;

/// One persisted turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub user_id: String,
    pub chat_id: Uuid,
    pub message_id: Uuid,
    pub question: String,
    pub answer: String,
    pub rating: Option<Rating>,
    pub recorded_at: DateTime<Utc>,
}

/// Accepts completed turns and rating events.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record(
        &self,
        user: &UserInformation,
        request: &ChatRequest,
        response: &ApproachResponse,
    ) -> Result<(), Error>;

    async fn rate(
        &self,
        user: &UserInformation,
        rating: &ChatRatingRequest,
    ) -> Result<(), Error>;
}

/// RwLock'd in-memory history with capacity eviction.
pub struct InMemoryHistory {
    turns: RwLock<Vec<TurnRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            turns: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn find(&self, chat_id: Uuid, message_id: Uuid) -> Option<TurnRecord> {
        self.turns
            .read()
            .await
            .iter()
            .find(|t| t.chat_id == chat_id && t.message_id == message_id)
            .cloned()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryRecorder for InMemoryHistory {
    async fn record(
        &self,
        user: &UserInformation,
        request: &ChatRequest,
        response: &ApproachResponse,
    ) -> Result<(), Error> {
        let mut turns = self.turns.write().await;
        if turns.len() >= MAX_TURNS {
            turns.remove(0);
        }
        turns.push(TurnRecord {
            user_id: user.user_id.clone(),
            chat_id: response.chat_id,
            message_id: response.message_id,
            question: request.question().unwrap_or_default().to_string(),
            answer: response.answer.clone(),
            rating: None,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn rate(
        &self,
        _user: &UserInformation,
        rating: &ChatRatingRequest,
    ) -> Result<(), Error> {
        let mut turns = self.turns.write().await;
        let turn = turns
            .iter_mut()
            .find(|t| t.chat_id == rating.chat_id && t.message_id == rating.chat_turn_id)
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "no recorded turn {} in chat {}",
                    rating.chat_turn_id, rating.chat_id
                ))
            })?;
        turn.rating = Some(rating.rating);
        Ok(())
    }
}

/// Blob storage seam for the document upload side-channel. Ingestion itself
/// is an external pipeline; the gateway only stores and acknowledges.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a blob, returning its storage id.
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<String, Error>;
}

pub struct InMemoryDocumentStore {
    blobs: RwLock<Vec<(String, usize)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<String, Error> {
        let blob_id = format!("{}-{}", Uuid::new_v4(), name);
        self.blobs.write().await.push((blob_id.clone(), bytes.len()));
        Ok(blob_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeflow_core::chat::{Approach, ChatTurn, RequestOptions};

    fn request_and_response() -> (ChatRequest, ApproachResponse) {
        let request = ChatRequest {
            chat_id: Uuid::new_v4(),
            chat_turn_id: Uuid::new_v4(),
            history: vec![ChatTurn::question("q")],
            selected_files: vec![],
            attachments: vec![],
            approach: Approach::Chat,
            options: RequestOptions::default(),
            overrides: None,
        };
        let response = ApproachResponse {
            answer: "a".into(),
            thoughts: None,
            data_points: vec![],
            citation_base_url: String::new(),
            message_id: request.chat_turn_id,
            chat_id: request.chat_id,
            followup_questions: vec![],
            diagnostics: None,
            error: None,
        };
        (request, response)
    }

    fn user() -> UserInformation {
        UserInformation::new("u1", "Test", "s1")
    }

    #[tokio::test]
    async fn records_and_finds_turns() {
        let history = InMemoryHistory::new();
        let (request, response) = request_and_response();

        history.record(&user(), &request, &response).await.unwrap();

        let record = history
            .find(request.chat_id, request.chat_turn_id)
            .await
            .unwrap();
        assert_eq!(record.question, "q");
        assert_eq!(record.answer, "a");
        assert!(record.rating.is_none());
    }

    #[tokio::test]
    async fn rating_attaches_to_recorded_turn() {
        let history = InMemoryHistory::new();
        let (request, response) = request_and_response();
        history.record(&user(), &request, &response).await.unwrap();

        history
            .rate(
                &user(),
                &ChatRatingRequest {
                    chat_id: request.chat_id,
                    chat_turn_id: request.chat_turn_id,
                    rating: Rating::ThumbsUp,
                    feedback: None,
                },
            )
            .await
            .unwrap();

        let record = history
            .find(request.chat_id, request.chat_turn_id)
            .await
            .unwrap();
        assert_eq!(record.rating, Some(Rating::ThumbsUp));
    }

    #[tokio::test]
    async fn rating_unknown_turn_fails() {
        let history = InMemoryHistory::new();
        let err = history
            .rate(
                &user(),
                &ChatRatingRequest {
                    chat_id: Uuid::new_v4(),
                    chat_turn_id: Uuid::new_v4(),
                    rating: Rating::ThumbsDown,
                    feedback: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn document_store_returns_blob_id() {
        let store = InMemoryDocumentStore::new();
        let blob_id = store.store("manual.pdf", vec![1, 2, 3]).await.unwrap();
        assert!(blob_id.ends_with("manual.pdf"));
        assert_eq!(store.len().await, 1);
    }
}
