use std::time::Duration;

use medbot_llm::{LlmError, LlmProvider};
use medbot_memory::{ScoredChunk, Turn};

use super::prompt::answer_messages;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded retry for transient answer-generation failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
    };

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Ask the model to answer `question` grounded in `context`.
///
/// # Errors
///
/// Returns the last provider error once retries are exhausted or the error is permanent,
/// or [`LlmError::EmptyResponse`] for a whitespace-only reply.
pub async fn generate_answer<P: LlmProvider>(
    provider: &P,
    persona: &str,
    history: &[Turn],
    question: &str,
    context: &[ScoredChunk],
    retry: RetryPolicy,
) -> Result<String, LlmError> {
    let messages = answer_messages(persona, history, question, context);

    let mut attempt = 0;
    let reply = loop {
        match provider.chat(&messages).await {
            Ok(reply) => break reply,
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let delay = retry.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = retry.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "answer generation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    };

    let answer = reply.trim();
    if answer.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: provider.name().to_owned(),
        });
    }
    Ok(answer.to_owned())
}
