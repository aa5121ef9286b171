#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("{provider} rejected the credential (status {status})")]
    Unauthorized { provider: String, status: u16 },

    #[error("{provider} API request failed (status {status})")]
    Api { provider: String, status: u16 },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[cfg(feature = "candle")]
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Classify a transport error, separating timeouts from other failures.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Credential rejections, malformed payloads and client errors are permanent;
    /// rate limits, timeouts, connection failures and server errors are transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout => true,
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
