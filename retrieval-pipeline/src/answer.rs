use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use common::{
    error::AppError,
    storage::types::{conversation::ConversationTurn, document_chunk::ChunkMatch},
};
use serde::{Deserialize, Serialize};

use crate::{history::format_history, routing::QueryMode};

pub const NO_CONTEXT_REPLY: &str =
    "I couldn't find relevant information in the notes. Could you rephrase your question?";

pub const MAX_SOURCES: usize = 3;

pub const SYLLABUS_SYSTEM_PROMPT: &str = r#"You are a syllabus-aware exam assistant.

Rules:
- Answer ONLY from the provided notes and PYQs.
- Use definitions and exam keywords.
- Write in a "what to write in exam" tone.
- Do NOT add extra theory.
- If something is outside the syllabus, clearly say so."#;

pub const GENERIC_SYSTEM_PROMPT: &str = r"The following question is outside the syllabus.

You are now acting as a generic AI tutor.
You may use general knowledge.
Explain clearly, but mention that this is not syllabus-bound.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub source: String,
    pub unit: String,
}

pub fn system_prompt(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::Syllabus => SYLLABUS_SYSTEM_PROMPT,
        QueryMode::Generic => GENERIC_SYSTEM_PROMPT,
    }
}

pub fn context_block(contexts: &[ChunkMatch]) -> String {
    contexts
        .iter()
        .map(|context| format!("[Source: {} - {}]\n{}", context.source, context.unit, context.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// History, retrieved context and the question; empty sections are left out.
pub fn create_user_message_with_history(
    contexts: &[ChunkMatch],
    history: &[ConversationTurn],
    query: &str,
) -> String {
    let mut sections = Vec::with_capacity(3);
    if !history.is_empty() {
        sections.push(format!("Chat history:\n{}", format_history(history)));
    }
    if !contexts.is_empty() {
        sections.push(format!("Context:\n{}", context_block(contexts)));
    }
    sections.push(format!("Question:\n{query}"));
    sections.join("\n\n")
}

pub fn create_chat_request(
    model: &str,
    mode: QueryMode,
    user_message: String,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(system_prompt(mode).to_string()).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
}

/// The first distinct `(source, unit)` pairs, in retrieval order.
pub fn collect_sources(contexts: &[ChunkMatch]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::with_capacity(MAX_SOURCES);
    for context in contexts {
        if sources.len() == MAX_SOURCES {
            break;
        }
        let candidate = Source {
            source: context.source.clone(),
            unit: context.unit.clone(),
        };
        if !sources.contains(&candidate) {
            sources.push(candidate);
        }
    }
    sources
}
