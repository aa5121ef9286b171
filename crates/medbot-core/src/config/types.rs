use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rag::prompt::{DEFAULT_CONTEXTUALIZE_PROMPT, DEFAULT_SYSTEM_PROMPT};
use crate::vault::Secret;

/// Top-level configuration for MedBot.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

fn default_app_name() -> String {
    "MedBot".into()
}

fn default_log_file() -> String {
    "medbot.log".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Where logs go while the terminal chat owns stdout.
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_file: default_log_file(),
        }
    }
}

/// Chat model backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Compatible,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compatible => "compatible",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_provider_name() -> String {
    "groq".into()
}

fn default_llm_base_url() -> String {
    medbot_llm::compatible::GROQ_BASE_URL.into()
}

fn default_llm_model() -> String {
    "llama3-8b-8192".into()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Label used in logs and errors for the OpenAI-compatible endpoint.
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Retries on HTTP 429 inside the provider, honoring `Retry-After`.
    #[serde(default)]
    pub rate_limit_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            provider_name: default_provider_name(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            rate_limit_retries: 0,
        }
    }
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    Compatible,
    Candle,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Compatible => "compatible",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_model() -> String {
    medbot_llm::ollama::DEFAULT_EMBEDDING_MODEL.into()
}

fn default_embedding_base_url() -> String {
    medbot_llm::ollama::DEFAULT_OLLAMA_URL.into()
}

fn default_device() -> String {
    "cpu".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    /// Model name for Ollama/compatible, Hugging Face repo id for candle.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// `cpu`, `cuda`, `metal` or `auto`; candle only.
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            device: default_device(),
        }
    }
}

fn default_index_path() -> String {
    "faiss_index".into()
}

fn default_docs_dir() -> String {
    "docs".into()
}

fn default_top_k() -> usize {
    3
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: String,
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            docs_dir: default_docs_dir(),
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Extra attempts for transient answer-generation failures. Zero disables retries.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_seconds: default_llm_timeout(),
            embedding_seconds: default_embedding_timeout(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

fn default_contextualize_prompt() -> String {
    DEFAULT_CONTEXTUALIZE_PROMPT.into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_contextualize_prompt")]
    pub contextualize: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            contextualize: default_contextualize_prompt(),
        }
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8090
}

fn default_gateway_rate_limit() -> u32 {
    120
}

fn default_gateway_max_body() -> usize {
    1_048_576
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Requests per minute per client IP.
    #[serde(default = "default_gateway_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_gateway_max_body")]
    pub max_body_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: None,
            rate_limit: default_gateway_rate_limit(),
            max_body_size: default_gateway_max_body(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub llm_api_key: Option<Secret>,
}
