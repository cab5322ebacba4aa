//! Retrieval-augmented chat — the shared pipeline and the batch strategy.
//!
//! # Flow
//!
//! 1. Seed context from history + profile + user
//! 2. Generate a standalone search query from the conversation
//! 3. Retrieve knowledge; the no-sources sentinel short-circuits to a fixed
//!    answer without calling the completion model
//! 4. Render the chat prompts with the retrieved knowledge injected
//! 5. Generate the grounded answer and assemble citations

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use citeflow_completion::ModelTiers;
use citeflow_config::ProfileDefinition;
use citeflow_core::chat::{ChatRequest, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::model::{ChatMessage, ChatModel, CompletionRequest};
use citeflow_core::response::ApproachResponse;
use citeflow_prompts::PromptVars;
use citeflow_retrieval::{DocumentSelection, KnowledgeRetriever};

use crate::approach::{ApproachKind, ChatApproach, NO_SOURCES_ANSWER};
use crate::assembler;
use crate::context::TurnContext;

/// Instruction appended to the system prompt when the caller asked for
/// follow-up suggestions.
pub(crate) const FOLLOWUP_INSTRUCTION: &str =
    "After the answer, suggest up to three short follow-up questions the \
     user could ask next, each wrapped in double angle brackets like \
     <<How often should the filter be replaced?>>.";

pub(crate) fn prompt_error(e: citeflow_prompts::PromptError) -> Error {
    Error::Config {
        message: e.to_string(),
    }
}

/// The dependencies and steps shared by the batch and streaming RAG
/// strategies.
#[derive(Clone)]
pub(crate) struct RagPipeline {
    pub models: Arc<ModelTiers>,
    pub retriever: Arc<KnowledgeRetriever>,
    pub temperature: f32,
}

impl RagPipeline {
    pub fn new(models: Arc<ModelTiers>, retriever: Arc<KnowledgeRetriever>, temperature: f32) -> Self {
        Self {
            models,
            retriever,
            temperature,
        }
    }

    pub fn answer_temperature(&self, request: &ChatRequest) -> f32 {
        request
            .overrides
            .as_ref()
            .and_then(|o| o.temperature)
            .unwrap_or(self.temperature)
    }

    /// GENERATE_SEARCH_QUERY: produce a standalone query from the
    /// conversation. A content-filtered completion sets the policy flag
    /// instead of failing; an empty answer falls back to the raw question.
    pub async fn generate_search_query(
        &self,
        model: &Arc<dyn ChatModel>,
        ctx: &mut TurnContext,
    ) -> Result<(), Error> {
        let vars = PromptVars {
            question: &ctx.question,
            history: &ctx.history_text,
            ..Default::default()
        };
        let messages = vec![
            ChatMessage::system(
                citeflow_prompts::resolve("search_query_system", &vars).map_err(prompt_error)?,
            ),
            ChatMessage::user(
                citeflow_prompts::resolve("search_query_user", &vars).map_err(prompt_error)?,
            ),
        ];

        let completion = model
            .complete(CompletionRequest::new(messages).with_temperature(0.0))
            .await?;

        if completion.filtered {
            info!("Search query generation rejected by content policy");
            ctx.policy_violation = true;
            return Ok(());
        }

        let query = completion.answer.trim().to_string();
        debug!(query = %query, "Search query generated");
        ctx.search_query = Some(if query.is_empty() {
            ctx.question.clone()
        } else {
            query
        });
        Ok(())
    }

    /// RETRIEVE_KNOWLEDGE: run the retriever with the generated query and
    /// the caller's document selection.
    pub async fn retrieve_knowledge(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
        ctx: &mut TurnContext,
    ) -> Result<(), Error> {
        let mut settings = profile.rag_settings()?.clone();
        if let Some(top) = request.overrides.as_ref().and_then(|o| o.top) {
            settings.document_files_count = top.max(1);
        }

        let selection = (!request.selected_files.is_empty()).then(|| DocumentSelection {
            filenames: request.selected_files.clone(),
            user_id: user.user_id.clone(),
            session_id: user.session_id.clone(),
        });

        let query = ctx
            .search_query
            .clone()
            .unwrap_or_else(|| ctx.question.clone());

        let summary = self
            .retriever
            .search(&query, &settings, selection.as_ref())
            .await?;

        ctx.knowledge = Some(summary);
        Ok(())
    }

    /// BUILD_PROMPT: render the chat system and user templates with the
    /// retrieved knowledge injected.
    pub fn build_prompt(
        &self,
        profile: &ProfileDefinition,
        request: &ChatRequest,
        ctx: &mut TurnContext,
    ) -> Result<Vec<ChatMessage>, Error> {
        let knowledge = ctx
            .knowledge
            .as_ref()
            .ok_or_else(|| Error::Internal("prompt built before retrieval".into()))?;

        let followup_instruction = if request
            .overrides
            .as_ref()
            .is_some_and(|o| o.suggest_followup_questions)
        {
            FOLLOWUP_INSTRUCTION
        } else {
            ""
        };

        let vars = PromptVars {
            question: &ctx.question,
            history: &ctx.history_text,
            sources: &knowledge.formatted_source_text,
            followup_instruction,
        };

        let template_name = profile
            .chat_system_message_file
            .as_deref()
            .unwrap_or("chat_system_rag");
        let system = citeflow_prompts::resolve(template_name, &vars).map_err(prompt_error)?;
        let user_message = citeflow_prompts::resolve("chat_user_rag", &vars).map_err(prompt_error)?;

        ctx.system_prompt = system.clone();
        ctx.rendered_user_message = Some(user_message.clone());

        Ok(vec![
            ChatMessage::system(system),
            ChatMessage::user(user_message),
        ])
    }

    /// The batch pipeline, shared by the batch strategy and the streaming
    /// strategy's non-streaming entry point.
    pub async fn run_batch(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        let mut ctx = TurnContext::for_request(request)?;
        let model = self.models.select(request.options.premium_model);

        info!(profile = %profile.name, "RAG: starting pipeline");

        self.generate_search_query(&model, &mut ctx).await?;
        self.retrieve_knowledge(user, profile, request, &mut ctx).await?;

        let has_sources = ctx
            .knowledge
            .as_ref()
            .is_some_and(|k| k.has_sources());
        if !has_sources {
            info!(profile = %profile.name, "RAG: no sources, short-circuiting");
            return Ok(assembler::build_response(
                profile,
                request,
                &ctx,
                NO_SOURCES_ANSWER,
            ));
        }

        let messages = self.build_prompt(profile, request, &mut ctx)?;
        let completion = model
            .complete(
                CompletionRequest::new(messages)
                    .with_temperature(self.answer_temperature(request)),
            )
            .await?;
        ctx.record_completion(&completion);

        info!(
            profile = %profile.name,
            answer_len = completion.answer.len(),
            "RAG: response generated"
        );

        Ok(assembler::build_response(
            profile,
            request,
            &ctx,
            &completion.answer,
        ))
    }
}

/// Retrieval-augmented chat, batch variant: one non-streaming completion.
pub struct RagChat {
    pipeline: RagPipeline,
}

impl RagChat {
    pub(crate) fn new(pipeline: RagPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ChatApproach for RagChat {
    fn kind(&self) -> ApproachKind {
        ApproachKind::RagBatch
    }

    async fn reply(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        self.pipeline.run_batch(user, profile, request).await
    }
}
