//! Named prompt templates and rendering.
//!
//! Templates are embedded at compile time and addressed by name; rendering
//! substitutes the recognized `{{placeholder}}` variables and leaves anything
//! unrecognized untouched. Pure over its inputs — no I/O, no state.

use thiserror::Error;

/// The embedded template set. Names match the original resource files.
const TEMPLATES: &[(&str, &str)] = &[
    (
        "search_query_system",
        include_str!("../templates/search_query_system.txt"),
    ),
    (
        "search_query_user",
        include_str!("../templates/search_query_user.txt"),
    ),
    (
        "chat_system_rag",
        include_str!("../templates/chat_system_rag.txt"),
    ),
    (
        "chat_user_rag",
        include_str!("../templates/chat_user_rag.txt"),
    ),
    (
        "chat_system_default",
        include_str!("../templates/chat_system_default.txt"),
    ),
];

#[derive(Debug, Clone, Error)]
pub enum PromptError {
    #[error("Prompt template not found: {0}")]
    NotFound(String),
}

/// Variables a template may reference. Missing values render as empty
/// strings; placeholders the renderer does not recognize are left as-is.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    pub question: &'a str,
    pub history: &'a str,
    pub sources: &'a str,
    pub followup_instruction: &'a str,
}

/// Look up a template by name.
pub fn get(name: &str) -> Result<&'static str, PromptError> {
    TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| *t)
        .ok_or_else(|| PromptError::NotFound(name.to_string()))
}

/// Render a template against a variable context.
pub fn render(template: &str, vars: &PromptVars<'_>) -> String {
    template
        .replace("{{question}}", vars.question)
        .replace("{{history}}", vars.history)
        .replace("{{sources}}", vars.sources)
        .replace("{{followup_instruction}}", vars.followup_instruction)
}

/// Convenience: look up and render in one step.
pub fn resolve(name: &str, vars: &PromptVars<'_>) -> Result<String, PromptError> {
    Ok(render(get(name)?, vars))
}
