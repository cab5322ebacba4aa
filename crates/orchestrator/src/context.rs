//! Per-turn pipeline state.
//!
//! Every value a pipeline step reads or writes lives in a named field here,
//! so step dependencies are explicit and checkable instead of hiding in a
//! stringly-keyed bag.

use std::time::Instant;

use citeflow_core::chat::ChatRequest;
use citeflow_core::error::Error;
use citeflow_core::knowledge::KnowledgeSummary;
use citeflow_core::model::{Completion, Usage};
use citeflow_core::response::Diagnostics;

/// Mutable state threaded through one orchestrated turn.
pub struct TurnContext {
    /// The question being answered (last history turn's user text).
    pub question: String,

    /// Conversation history rendered for prompt injection.
    pub history_text: String,

    /// System prompt handed to the answer-generating call.
    pub system_prompt: String,

    /// Standalone search query produced by the query-generation step.
    pub search_query: Option<String>,

    /// Retrieval output, including the no-sources sentinel.
    pub knowledge: Option<KnowledgeSummary>,

    /// Rendered user message for the answer-generating call.
    pub rendered_user_message: Option<String>,

    /// Set when the search-query step was rejected by content policy.
    pub policy_violation: bool,

    /// Token usage of the answer-generating call.
    pub usage: Option<Usage>,

    /// Which deployment answered.
    pub model_deployment: String,

    /// Wall-clock duration of the answer-generating call.
    pub answer_duration_ms: u64,

    started: Instant,
}

impl TurnContext {
    /// Seed a context from a validated request.
    pub fn for_request(request: &ChatRequest) -> Result<Self, Error> {
        request.validate()?;
        let question = request
            .question()
            .ok_or_else(|| Error::InvalidRequest("history must be non-empty".into()))?
            .to_string();

        Ok(Self {
            question,
            history_text: render_history(request),
            system_prompt: String::new(),
            search_query: None,
            knowledge: None,
            rendered_user_message: None,
            policy_violation: false,
            usage: None,
            model_deployment: String::new(),
            answer_duration_ms: 0,
            started: Instant::now(),
        })
    }

    /// Record usage and timing from the answer-generating call.
    pub fn record_completion(&mut self, completion: &Completion) {
        self.usage = completion.usage.clone();
        self.answer_duration_ms = completion.duration_ms;
        self.model_deployment = completion.model.clone();
    }

    pub fn workflow_duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Diagnostics, or `None` when no usage source was recorded.
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        let usage = self.usage.as_ref()?;
        Some(Diagnostics {
            completion_tokens: usage.completion_tokens,
            prompt_tokens: usage.prompt_tokens,
            total_tokens: usage.total_tokens,
            answer_duration_ms: self.answer_duration_ms,
            model_deployment_name: self.model_deployment.clone(),
            workflow_duration_ms: self.workflow_duration_ms(),
        })
    }
}

/// Render history turns as alternating `user:`/`assistant:` lines.
fn render_history(request: &ChatRequest) -> String {
    let mut lines = Vec::new();
    for turn in &request.history {
        lines.push(format!("user: {}", turn.user));
        if let Some(assistant) = &turn.assistant {
            lines.push(format!("assistant: {assistant}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeflow_core::chat::{Approach, ChatTurn, RequestOptions};
    use uuid::Uuid;

    fn request(history: Vec<ChatTurn>) -> ChatRequest {
        ChatRequest {
            chat_id: Uuid::new_v4(),
            chat_turn_id: Uuid::new_v4(),
            history,
            selected_files: vec![],
            attachments: vec![],
            approach: Approach::Rag,
            options: RequestOptions::default(),
            overrides: None,
        }
    }

    #[test]
    fn seeds_question_and_history() {
        let ctx = TurnContext::for_request(&request(vec![
            ChatTurn::answered("How fast?", "About 100 km/h."),
            ChatTurn::question("And how far?"),
        ]))
        .unwrap();

        assert_eq!(ctx.question, "And how far?");
        assert_eq!(
            ctx.history_text,
            "user: How fast?\nassistant: About 100 km/h.\nuser: And how far?"
        );
    }

    #[test]
    fn empty_history_fails() {
        assert!(TurnContext::for_request(&request(vec![])).is_err());
    }

    #[test]
    fn diagnostics_absent_without_usage() {
        let ctx = TurnContext::for_request(&request(vec![ChatTurn::question("q")])).unwrap();
        assert!(ctx.diagnostics().is_none());
    }

    #[test]
    fn diagnostics_built_from_completion() {
        let mut ctx = TurnContext::for_request(&request(vec![ChatTurn::question("q")])).unwrap();
        ctx.record_completion(&Completion {
            answer: "a".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            duration_ms: 42,
            model: "gpt-test".into(),
            filtered: false,
        });

        let diag = ctx.diagnostics().unwrap();
        assert_eq!(diag.total_tokens, 15);
        assert_eq!(diag.answer_duration_ms, 42);
        assert_eq!(diag.model_deployment_name, "gpt-test");
    }
}
