//! Response assembly — the last pipeline step.
//!
//! Deterministic over its inputs: strips follow-up markers, numbers
//! citations in first-occurrence order, converts remaining newlines for
//! display, and attaches diagnostics when a usage source exists.
//! `message_id` and `chat_id` are always copied from the request.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use citeflow_config::ProfileDefinition;
use citeflow_core::chat::ChatRequest;
use citeflow_core::response::{ApproachResponse, DataPoint};

use crate::context::TurnContext;

/// `[filename]` citation markers in raw model output.
static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").expect("citation marker regex"));

/// `<<question>>` follow-up markers; stripped before citation parsing.
static FOLLOWUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<([^<>]+)>>").expect("followup marker regex"));

/// Replace each citation marker with its first-occurrence number.
///
/// Returns the rewritten text and the distinct citation names in numbering
/// order: `[docA] [docB] [docA]` becomes `[1] [2] [1]` with
/// `["docA", "docB"]`.
pub fn number_citations(text: &str) -> (String, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let mut numbers: HashMap<String, usize> = HashMap::new();

    let rewritten = CITATION.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = caps[1].to_string();
        let number = *numbers.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            order.len()
        });
        format!("[{number}]")
    });

    (rewritten.into_owned(), order)
}

/// Remove `<<question>>` markers, returning the cleaned text and the
/// questions in order of appearance.
pub fn extract_followups(text: &str) -> (String, Vec<String>) {
    let mut questions = Vec::new();
    let cleaned = FOLLOWUP.replace_all(text, |caps: &regex::Captures<'_>| {
        questions.push(caps[1].trim().to_string());
        String::new()
    });
    (cleaned.trim().to_string(), questions)
}

/// Build the final immutable response from a raw model answer.
pub fn build_response(
    profile: &ProfileDefinition,
    request: &ChatRequest,
    ctx: &TurnContext,
    raw_answer: &str,
) -> ApproachResponse {
    let (without_followups, followups) = extract_followups(raw_answer);
    let (numbered, _citations) = number_citations(&without_followups);
    let answer = numbered.replace("\r\n", "<br>").replace('\n', "<br>");

    let data_points = ctx
        .knowledge
        .as_ref()
        .map(|k| {
            k.sources
                .iter()
                .map(|doc| DataPoint {
                    title: doc.filepath().to_string(),
                    content: doc.content().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let suggest_followups = request
        .overrides
        .as_ref()
        .is_some_and(|o| o.suggest_followup_questions);

    ApproachResponse {
        answer,
        thoughts: build_thoughts(ctx),
        data_points,
        citation_base_url: profile
            .rag_settings
            .as_ref()
            .map(|r| r.citation_base_url.clone())
            .unwrap_or_default(),
        message_id: request.chat_turn_id,
        chat_id: request.chat_id,
        followup_questions: if suggest_followups { followups } else { vec![] },
        diagnostics: ctx.diagnostics(),
        error: None,
    }
}

/// Build a response for strategies with no local pipeline state (the
/// external endpoint variants): answer as-is, synthesized thoughts,
/// no diagnostics.
pub fn external_response(
    request: &ChatRequest,
    answer: String,
    thoughts: Option<String>,
) -> ApproachResponse {
    ApproachResponse {
        answer,
        thoughts,
        data_points: vec![],
        citation_base_url: String::new(),
        message_id: request.chat_turn_id,
        chat_id: request.chat_id,
        followup_questions: vec![],
        diagnostics: None,
        error: None,
    }
}

fn build_thoughts(ctx: &TurnContext) -> Option<String> {
    match (&ctx.search_query, ctx.system_prompt.is_empty()) {
        (Some(query), _) => {
            let sources = ctx
                .knowledge
                .as_ref()
                .map(|k| k.sources.len())
                .unwrap_or(0);
            Some(format!(
                "Searched for:\n{query}\n\nUsed {sources} source(s)\n\nPrompt:\n{}",
                ctx.system_prompt
            ))
        }
        (None, false) => Some(format!("Prompt:\n{}", ctx.system_prompt)),
        (None, true) => None,
    }
}
