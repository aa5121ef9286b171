//! Retrieval-augmented answering: reformulate, retrieve, generate.

pub mod generator;
pub mod prompt;
pub mod reformulate;
pub mod retriever;

use std::time::Duration;

use medbot_llm::{Embedder, LlmProvider};
use medbot_memory::{ScoredChunk, Turn};

pub use generator::{RetryPolicy, generate_answer};
pub use reformulate::reformulate;
pub use retriever::Retriever;

use crate::config::{GenerationConfig, PromptConfig};
use crate::error::{GenerationStage, TurnError};

/// The three pipeline stages bound to one chat provider, one retriever and fixed
/// prompts. Shared read-only between sessions.
pub struct RagPipeline<P, E> {
    provider: P,
    retriever: Retriever<E>,
    prompts: PromptConfig,
    retry: RetryPolicy,
}

impl<P: LlmProvider, E: Embedder> RagPipeline<P, E> {
    #[must_use]
    pub fn new(provider: P, retriever: Retriever<E>) -> Self {
        Self {
            provider,
            retriever,
            prompts: PromptConfig::default(),
            retry: RetryPolicy::NONE,
        }
    }

    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptConfig) -> Self {
        self.prompts = prompts;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_generation_config(self, config: &GenerationConfig) -> Self {
        self.with_retry(RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn retriever(&self) -> &Retriever<E> {
        &self.retriever
    }

    /// # Errors
    ///
    /// Returns [`TurnError::Generation`] tagged with the reformulation stage.
    pub async fn reformulate(&self, history: &[Turn], input: &str) -> Result<String, TurnError> {
        reformulate(&self.provider, &self.prompts.contextualize, history, input)
            .await
            .map_err(|cause| TurnError::Generation {
                stage: GenerationStage::Reformulate,
                cause,
            })
    }

    /// # Errors
    ///
    /// Returns [`TurnError::Retrieval`] on embedding or index failure.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, TurnError> {
        self.retriever
            .retrieve(question)
            .await
            .map_err(|cause| TurnError::Retrieval { cause })
    }

    /// # Errors
    ///
    /// Returns [`TurnError::Generation`] tagged with the answer stage.
    pub async fn generate(
        &self,
        history: &[Turn],
        question: &str,
        context: &[ScoredChunk],
    ) -> Result<String, TurnError> {
        generate_answer(
            &self.provider,
            &self.prompts.system,
            history,
            question,
            context,
            self.retry,
        )
        .await
        .map_err(|cause| TurnError::Generation {
            stage: GenerationStage::Answer,
            cause,
        })
    }
}
