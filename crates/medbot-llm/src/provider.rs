use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Channel for human-readable provider status updates (rate-limit waits and the like).
pub type StatusTx = tokio::sync::mpsc::UnboundedSender<String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the assistant completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn name(&self) -> &str;
}

/// Maps text to a fixed-length vector. Must be deterministic for a given model.
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or returns no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Identifier of the embedding model, recorded in index manifests.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("a").role, Role::System);
        assert_eq!(Message::user("b").role, Role::User);
        assert_eq!(Message::assistant("c").role, Role::Assistant);
        assert_eq!(Message::user("b").content, "b");
    }
}
