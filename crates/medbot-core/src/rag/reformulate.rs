use medbot_llm::{LlmError, LlmProvider};
use medbot_memory::Turn;

use super::prompt::reformulation_messages;

/// Rewrite `utterance` into a question that can be understood without `history`.
///
/// With no history there is nothing to resolve, so the utterance is returned as-is and
/// the model is not called.
///
/// # Errors
///
/// Returns the provider error, or [`LlmError::EmptyResponse`] if the model replies with
/// only whitespace.
pub async fn reformulate<P: LlmProvider>(
    provider: &P,
    instruction: &str,
    history: &[Turn],
    utterance: &str,
) -> Result<String, LlmError> {
    if history.is_empty() {
        return Ok(utterance.to_owned());
    }

    let messages = reformulation_messages(instruction, history, utterance);
    let reply = provider.chat(&messages).await?;
    let standalone = reply.trim();
    if standalone.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: provider.name().to_owned(),
        });
    }

    tracing::debug!(
        history_turns = history.len(),
        standalone = %standalone,
        "question reformulated"
    );
    Ok(standalone.to_owned())
}
