//! Simple chat — no retrieval, attachments folded into the user turn.
//!
//! BUILD_CONTEXT renders the profile's system prompt and classifies each
//! attachment by media type: images ride along as image content, PDFs go
//! through the text-extraction collaborator, everything else is decoded as
//! UTF-8 text. GENERATE_ANSWER streams tokens directly; assembly wraps the
//! concatenated output with token-count diagnostics.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use citeflow_completion::ModelTiers;
use citeflow_config::ProfileDefinition;
use citeflow_core::chat::{ChatRequest, UserInformation};
use citeflow_core::error::Error;
use citeflow_core::model::{ChatMessage, CompletionRequest};
use citeflow_core::response::{ApproachResponse, ChatChunkResponse};
use citeflow_prompts::PromptVars;

use crate::approach::{ApproachKind, ChatApproach, ChunkReceiver};
use crate::approaches::rag::prompt_error;
use crate::assembler;
use crate::attachments::{classify, decode_data_url, AttachmentKind, TextExtraction};
use crate::context::TurnContext;

pub struct SimpleChat {
    models: Arc<ModelTiers>,
    extractor: Arc<dyn TextExtraction>,
    temperature: f32,
}

impl SimpleChat {
    pub fn new(
        models: Arc<ModelTiers>,
        extractor: Arc<dyn TextExtraction>,
        temperature: f32,
    ) -> Self {
        Self {
            models,
            extractor,
            temperature,
        }
    }

    /// BUILD_CONTEXT: system prompt plus the full history, with attachments
    /// appended to the final user turn.
    fn build_messages(
        &self,
        profile: &ProfileDefinition,
        request: &ChatRequest,
        ctx: &mut TurnContext,
    ) -> Result<Vec<ChatMessage>, Error> {
        let template_name = profile
            .chat_system_message_file
            .as_deref()
            .unwrap_or("chat_system_default");
        let system =
            citeflow_prompts::resolve(template_name, &PromptVars::default()).map_err(prompt_error)?;
        ctx.system_prompt = system.clone();

        let mut messages = vec![ChatMessage::system(system)];

        let (earlier, last) = request
            .history
            .split_at(request.history.len().saturating_sub(1));

        for turn in earlier {
            messages.push(ChatMessage::user(&turn.user));
            if let Some(assistant) = &turn.assistant {
                messages.push(ChatMessage::assistant(assistant));
            }
        }

        let question = last.first().map(|t| t.user.as_str()).unwrap_or_default();
        let mut user_message = ChatMessage::user(question);

        for attachment in &request.attachments {
            let decoded = decode_data_url(&attachment.data_url)?;
            match classify(&decoded.media_type) {
                AttachmentKind::Image => {
                    user_message = user_message.with_image(&attachment.data_url);
                }
                AttachmentKind::Pdf => {
                    let text = self.extractor.extract_pdf_text(&decoded.bytes)?;
                    user_message.content.push_str(&format!(
                        "\n\nAttached file {}:\n{text}",
                        attachment.name
                    ));
                }
                AttachmentKind::Text => {
                    let text = String::from_utf8_lossy(&decoded.bytes);
                    user_message.content.push_str(&format!(
                        "\n\nAttached file {}:\n{text}",
                        attachment.name
                    ));
                }
            }
        }

        messages.push(user_message);
        Ok(messages)
    }

    fn completion_request(&self, messages: Vec<ChatMessage>, request: &ChatRequest) -> CompletionRequest {
        let temperature = request
            .overrides
            .as_ref()
            .and_then(|o| o.temperature)
            .unwrap_or(self.temperature);
        CompletionRequest::new(messages).with_temperature(temperature)
    }
}

#[async_trait]
impl ChatApproach for SimpleChat {
    fn kind(&self) -> ApproachKind {
        ApproachKind::SimpleChat
    }

    async fn reply(
        &self,
        _user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ApproachResponse, Error> {
        let mut ctx = TurnContext::for_request(request)?;
        let messages = self.build_messages(profile, request, &mut ctx)?;
        let model = self.models.select(request.options.premium_model);

        info!(profile = %profile.name, "Simple chat: generating answer");

        let started = Instant::now();
        let mut deltas = model.stream(self.completion_request(messages, request)).await?;

        let mut answer = String::new();
        while let Some(item) = deltas.recv().await {
            let delta = item?;
            if let Some(usage) = delta.usage {
                ctx.usage = Some(usage);
            }
            answer.push_str(&delta.text);
        }

        ctx.answer_duration_ms = started.elapsed().as_millis() as u64;
        ctx.model_deployment = model.deployment().to_string();

        Ok(assembler::build_response(profile, request, &ctx, &answer))
    }

    async fn reply_streaming(
        &self,
        _user: &UserInformation,
        profile: &ProfileDefinition,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, Error> {
        let mut ctx = TurnContext::for_request(request)?;
        let messages = self.build_messages(profile, request, &mut ctx)?;
        let model = self.models.select(request.options.premium_model);
        let completion_request = self.completion_request(messages, request);

        let profile = profile.clone();
        let request = request.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
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

            ctx.answer_duration_ms = started.elapsed().as_millis() as u64;
            ctx.model_deployment = model.deployment().to_string();

            let response = assembler::build_response(&profile, &request, &ctx, &answer);
            let _ = tx.send(Ok(ChatChunkResponse::terminal(response))).await;
        });

        Ok(rx)
    }
}
