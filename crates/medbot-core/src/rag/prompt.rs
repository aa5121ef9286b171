use medbot_llm::Message;
use medbot_memory::{ScoredChunk, Turn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are MedBot, an expert AI medical assistant.
Provide clear, concise, and safe answers to user medical queries.
If a question is outside your scope, politely recommend consulting a healthcare professional.
Do not answer questions unrelated to health and medicine.";

pub const DEFAULT_CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question which might reference context, formulate a standalone question. Do NOT answer, just reformulate.";

/// `[system instruction, history..., user utterance]`.
#[must_use]
pub fn reformulation_messages(
    instruction: &str,
    history: &[Turn],
    utterance: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(instruction));
    messages.extend(history.iter().map(Turn::to_message));
    messages.push(Message::user(utterance));
    messages
}

/// `[system persona, history..., user question, system context]`.
#[must_use]
pub fn answer_messages(
    persona: &str,
    history: &[Turn],
    question: &str,
    context: &[ScoredChunk],
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(Message::system(persona));
    messages.extend(history.iter().map(Turn::to_message));
    messages.push(Message::user(question));
    messages.push(Message::system(format!("Context: {}", format_context(context))));
    messages
}

/// Chunk contents in rank order, separated by blank lines.
#[must_use]
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}
