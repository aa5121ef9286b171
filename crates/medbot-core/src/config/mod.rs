mod env;
mod types;


pub use types::*;

use std::path::Path;

use crate::error::ConfigError;
use crate::vault::{Secret, VaultProvider};

/// Primary credential variable, checked before [`LEGACY_API_KEY_VAR`].
pub const API_KEY_VAR: &str = "MEDBOT_LLM_API_KEY";
pub const LEGACY_API_KEY_VAR: &str = "GROQ_API_KEY";
pub const GATEWAY_TOKEN_VAR: &str = "MEDBOT_GATEWAY_TOKEN";

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Self>(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve sensitive configuration values through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> Result<(), ConfigError> {
        for key in [API_KEY_VAR, LEGACY_API_KEY_VAR] {
            if let Some(val) = vault.get_secret(key).await.map_err(ConfigError::Vault)? {
                tracing::debug!(source = key, "LLM credential resolved");
                self.secrets.llm_api_key = Some(Secret::new(val));
                break;
            }
        }
        if let Some(val) = vault
            .get_secret(GATEWAY_TOKEN_VAR)
            .await
            .map_err(ConfigError::Vault)?
        {
            self.gateway.auth_token = Some(val);
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.index.top_k == 0 {
            return invalid("index.top_k must be at least 1");
        }
        if self.index.chunk_size == 0 {
            return invalid("index.chunk_size must be at least 1");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return invalid("index.chunk_overlap must be smaller than index.chunk_size");
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty");
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens must be at least 1");
        }
        if self.llm.base_url.trim().is_empty() {
            return invalid("llm.base_url must not be empty");
        }
        if let Some(t) = self.llm.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return invalid("llm.temperature must be between 0.0 and 2.0");
        }
        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty");
        }
        if self.timeouts.llm_seconds == 0 || self.timeouts.embedding_seconds == 0 {
            return invalid("timeouts must be at least one second");
        }
        Ok(())
    }

    /// Credential for the OpenAI-compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] when no key was resolved.
    pub fn llm_api_key(&self) -> Result<&Secret, ConfigError> {
        self.secrets
            .llm_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingCredential {
                provider: self.llm.provider_name.clone(),
            })
    }

    /// Whether a remote credential is needed for the configured backends.
    #[must_use]
    pub fn requires_api_key(&self) -> bool {
        self.llm.provider == ProviderKind::Compatible
            || self.embedding.provider == EmbeddingProviderKind::Compatible
    }
}
