#[cfg(feature = "candle")]
use crate::candle_embed::CandleEmbedder;
use crate::compatible::CompatibleProvider;
use crate::error::LlmError;
#[cfg(feature = "mock")]
use crate::mock::{MockEmbedder, MockProvider};
use crate::ollama::OllamaProvider;
use crate::provider::{Embedder, LlmProvider, Message, StatusTx};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Compatible($p) => $expr,
            AnyProvider::Ollama($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Compatible($p) => $expr,
            AnyEmbedder::Ollama($p) => $expr,
            #[cfg(feature = "candle")]
            AnyEmbedder::Candle($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

/// Chat backend selected at startup from configuration.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Compatible(CompatibleProvider),
    Ollama(OllamaProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl AnyProvider {
    /// Propagate a status sender to the inner provider (where supported).
    pub fn set_status_tx(&mut self, tx: StatusTx) {
        match self {
            Self::Compatible(p) => p.set_status_tx(tx),
            Self::Ollama(_) => {}
            #[cfg(feature = "mock")]
            Self::Mock(_) => {}
        }
    }
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }
}

/// Embedding backend selected at startup from configuration.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Compatible(CompatibleProvider),
    Ollama(OllamaProvider),
    #[cfg(feature = "candle")]
    Candle(CandleEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl Embedder for AnyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    fn model_name(&self) -> &str {
        delegate_embedder!(self, |p| p.model_name())
    }
}
