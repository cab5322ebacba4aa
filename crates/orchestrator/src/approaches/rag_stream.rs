//! Retrieval-augmented chat, streaming variant.
//!
//! Identical to the batch pipeline through retrieval, then streams the
//! answer: every non-empty delta becomes a chunk, the producer yields to the
//! scheduler after each send so the transport can flush, and assembly runs
//! exactly once after exhaustion to produce the terminal chunk.
//!
//! A policy violation from the search-query step becomes one terminal chunk
//! with the fixed policy message. Cancellation (the receiver dropping) is
//! observed between chunks; after it no further upstream calls are issued
//! and no terminal chunk is emitted.

use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use citeflow_config::ProfileDefinition;
use citeflow_core::chat::{ChatRequest, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::model::CompletionRequest;
use citeflow_core::response::{ApproachResponse, ChatChunkResponse};

use crate::approach::{
    ApproachKind, ChatApproach, ChunkReceiver, NO_SOURCES_ANSWER, POLICY_VIOLATION_ANSWER,
};
use crate::approaches::rag::RagPipeline;
use crate::assembler;
use crate::context::TurnContext;

pub struct RagChatStream {
    pipeline: RagPipeline,
}

impl RagChatStream {
    pub(crate) fn new(pipeline: RagPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ChatApproach for RagChatStream {
    fn kind(&self) -> ApproachKind {
        ApproachKind::RagStreaming
    }

    async fn reply(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        self.pipeline.run_batch(user, profile, request).await
    }

    async fn reply_streaming(
        &self,
        user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, Error> {
        request.validate()?;

        let pipeline = self.pipeline.clone();
        let user = user.clone();
        let profile = profile.clone();
        let request = request.clone();

        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut ctx = match TurnContext::for_request(&request) {
                Ok(ctx) => ctx,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            let model = pipeline.models.select(request.options.premium_model);

            info!(profile = %profile.name, "RAG stream: starting pipeline");

            if let Err(e) = pipeline.generate_search_query(&model, &mut ctx).await {
                let _ = tx.send(Err(e)).await;
                return;
            }

            if ctx.policy_violation {
                let response =
                    assembler::build_response(&profile, &request, &ctx, POLICY_VIOLATION_ANSWER);
                let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
                return;
            }

            // Cancelled while generating the query: stop before retrieval.
            if tx.is_closed() {
                return;
            }

            if let Err(e) = pipeline
                .retrieve_knowledge(&user, &profile, &request, &mut ctx)
                .await
            {
                let _ = tx.send(Err(e)).await;
                return;
            }

            let has_sources = ctx.knowledge.as_ref().is_some_and(|k| k.has_sources());
            if !has_sources {
                info!(profile = %profile.name, "RAG stream: no sources, short-circuiting");
                let response =
                    assembler::build_response(&profile, &request, &ctx, NO_SOURCES_ANSWER);
                let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
                return;
            }

            if tx.is_closed() {
                return;
            }

            let messages = match pipeline.build_prompt(&profile, &request, &mut ctx) {
                Ok(messages) => messages,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let completion_request = CompletionRequest::new(messages)
                .with_temperature(pipeline.answer_temperature(&request));

            let started = Instant::now();
            let mut deltas = match model.stream(completion_request).await {
                Ok(deltas) => deltas,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let mut answer = String::new();
            while let Some(item) = deltas.recv().await {
                match item {
                    Ok(delta) => {
                        if let Some(usage) = delta.usage {
                            ctx.usage = Some(usage);
                        }
                        if delta.text.is_empty() {
                            continue;
                        }
                        answer.push_str(&delta.text);
                        if tx
                            .send(Ok(ChatChunkResponse::delta(delta.text.as_str())))
                            .await
                            .is_err()
                        {
                            // Receiver dropped: clean cancellation, no
                            // terminal chunk, no further upstream pulls.
                            return;
                        }
                        // Hand control back so the transport can flush
                        // before the next delta is produced.
                        tokio::task::yield_now().await;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            ctx.answer_duration_ms = started.elapsed().as_millis() as u64;
            ctx.model_deployment = model.deployment().to_string();

            let response = assembler::build_response(&profile, &request, &ctx, &answer);
            let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
        });

        Ok(rx)
    }
}
