use std::fmt;
use std::path::PathBuf;

use medbot_llm::LlmError;
use medbot_memory::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no API key for provider '{provider}': set MEDBOT_LLM_API_KEY or GROQ_API_KEY")]
    MissingCredential { provider: String },

    #[error("secret backend failed: {0:#}")]
    Vault(anyhow::Error),
}

/// Fatal startup failure. The application refuses to start a chat when this occurs.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("vector index unavailable: {0}")]
    Index(#[from] IndexError),

    #[error("provider setup failed: {0}")]
    Provider(#[from] LlmError),
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(LlmError),

    #[error("similarity search failed: {0}")]
    Index(IndexError),
}

/// Pipeline stage that talks to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Reformulate,
    Answer,
}

impl GenerationStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reformulate => "query reformulation",
            Self::Answer => "answer generation",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a failed turn. Committed history is never touched when one of these is
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("retrieval failed: {cause}")]
    Retrieval { cause: RetrievalError },

    #[error("{stage} failed: {cause}")]
    Generation {
        stage: GenerationStage,
        cause: LlmError,
    },

    #[error("turn cancelled")]
    Cancelled,

    #[error("a response is already being generated for this session")]
    Busy,
}

impl TurnError {
    /// Whether resubmitting the same input may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Retrieval {
                cause: RetrievalError::Embedding(e),
            }
            | Self::Generation { cause: e, .. } => !matches!(e, LlmError::Unauthorized { .. }),
            Self::Retrieval {
                cause: RetrievalError::Index(_),
            } => false,
            Self::Cancelled | Self::Busy => true,
        }
    }

    /// Short text suitable for showing to the person chatting.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Please type a question first.",
            Self::Retrieval { .. } => {
                "I couldn't search the medical reference documents just now. Please try again."
            }
            Self::Generation {
                cause: LlmError::Unauthorized { .. },
                ..
            } => "The language model rejected the configured API key.",
            Self::Generation {
                cause: LlmError::RateLimited,
                ..
            } => "The language model is rate limiting requests. Please wait a moment and retry.",
            Self::Generation { .. } => "I couldn't generate an answer. Please try again.",
            Self::Cancelled => "The request was cancelled.",
            Self::Busy => "Still working on your previous question.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_not_retryable() {
        assert!(!TurnError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn transient_generation_failure_is_retryable() {
        let err = TurnError::Generation {
            stage: GenerationStage::Answer,
            cause: LlmError::Timeout,
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "answer generation failed: request timed out");
    }

    #[test]
    fn unauthorized_is_not_retryable() {
        let err = TurnError::Generation {
            stage: GenerationStage::Reformulate,
            cause: LlmError::Unauthorized {
                provider: "groq".into(),
                status: 401,
            },
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.user_message(),
            "The language model rejected the configured API key."
        );
    }

    #[test]
    fn retrieval_embedding_failure_is_retryable() {
        let err = TurnError::Retrieval {
            cause: RetrievalError::Embedding(LlmError::Other("connection refused".into())),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn retrieval_index_failure_is_not_retryable() {
        let err = TurnError::Retrieval {
            cause: RetrievalError::Index(IndexError::DimensionMismatch {
                expected: 384,
                actual: 768,
            }),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn turn_error_chain_names_cause_once() {
        use std::error::Error as _;

        let err = TurnError::Retrieval {
            cause: RetrievalError::Embedding(LlmError::Timeout),
        };
        assert_eq!(
            err.to_string(),
            "retrieval failed: embedding failed: request timed out"
        );
        assert!(err.source().is_none());

        let chained = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chained.matches("request timed out").count(), 1);
    }

    #[test]
    fn stage_display() {
        assert_eq!(GenerationStage::Reformulate.to_string(), "query reformulation");
    }
}
