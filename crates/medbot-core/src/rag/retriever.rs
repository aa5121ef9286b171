use std::sync::Arc;

use medbot_llm::Embedder;
use medbot_memory::{ScoredChunk, VectorIndex};

use crate::error::RetrievalError;

/// Top-k lookup against a shared read-only index. Every call re-embeds the question.
pub struct Retriever<E> {
    embedder: E,
    index: Arc<VectorIndex>,
    top_k: usize,
}

impl<E: Embedder> Retriever<E> {
    #[must_use]
    pub fn new(embedder: E, index: Arc<VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// # Errors
    ///
    /// Returns [`RetrievalError::Embedding`] if the question cannot be embedded and
    /// [`RetrievalError::Index`] if its vector does not fit the index.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(RetrievalError::Embedding)?;
        let hits = self
            .index
            .similarity_search(&query, self.top_k)
            .map_err(RetrievalError::Index)?;

        tracing::debug!(
            k = self.top_k,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved context"
        );
        Ok(hits)
    }
}
