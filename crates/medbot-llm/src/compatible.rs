//! Provider for any endpoint speaking the `OpenAI` chat-completions wire format
//! (Groq, `OpenAI`, vLLM, LM Studio, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{Embedder, LlmProvider, Message, Role, StatusTx};
use crate::retry::send_with_retry;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Clone)]
pub struct CompatibleProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    embedding_model: Option<String>,
    max_retries: u32,
    status_tx: Option<StatusTx>,
}

impl fmt::Debug for CompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibleProvider")
            .field("provider_name", &self.provider_name)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("embedding_model", &self.embedding_model)
            .field("max_retries", &self.max_retries)
            .field("status_tx", &self.status_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl CompatibleProvider {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        provider_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            provider_name: provider_name.into(),
            api_key: api_key.into(),
            base_url,
            model: model.into(),
            max_tokens: 1024,
            temperature: None,
            embedding_model: None,
            max_retries: 0,
            status_tx: None,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Number of extra attempts after a 429 response.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn set_status_tx(&mut self, tx: StatusTx) {
        self.status_tx = Some(tx);
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<String, LlmError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = send_with_retry(
            &self.provider_name,
            self.max_retries,
            self.status_tx.as_ref(),
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(body)
                    .send()
            },
        )
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::from_transport)?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::error!(provider = %self.provider_name, %status, "credential rejected");
            return Err(LlmError::Unauthorized {
                provider: self.provider_name.clone(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            tracing::error!("{} API error {status}: {text}", self.provider_name);
            return Err(LlmError::Api {
                provider: self.provider_name.clone(),
                status: status.as_u16(),
            });
        }

        Ok(text)
    }
}

impl LlmProvider for CompatibleProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: convert_messages(messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let text = self.post_json("chat/completions", &body).await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        if let Some(usage) = &resp.usage {
            tracing::debug!(
                provider = %self.provider_name,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
        }

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.provider_name.clone(),
            })
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

impl Embedder for CompatibleProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or_else(|| LlmError::EmbedUnsupported {
                provider: self.provider_name.clone(),
            })?;

        let body = EmbeddingRequest { input: text, model };
        let text = self.post_json("embeddings", &body).await?;
        let resp: EmbeddingResponse = serde_json::from_str(&text)?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.provider_name.clone(),
            })
    }

    fn model_name(&self) -> &str {
        self.embedding_model.as_deref().unwrap_or_default()
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        })
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
