//! Application bootstrap: config resolution, provider, embedder and index construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use medbot_llm::compatible::CompatibleProvider;
use medbot_llm::ollama::OllamaProvider;
use medbot_llm::{AnyEmbedder, AnyProvider, Embedder};
use medbot_memory::VectorIndex;
use medbot_memory::document::SplitterConfig;
use tokio::sync::{mpsc, watch};

use crate::config::{Config, EmbeddingProviderKind, ProviderKind};
use crate::error::{ConfigError, StartupError};
use crate::rag::{RagPipeline, Retriever};
use crate::vault::VaultProvider;

pub type Pipeline = RagPipeline<AnyProvider, AnyEmbedder>;

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

impl AppBuilder {
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded, the vault fails, or validation
    /// rejects a setting.
    pub async fn load(
        config_path: PathBuf,
        vault: &dyn VaultProvider,
    ) -> Result<Self, StartupError> {
        let mut config = Config::load(&config_path)?;
        config.resolve_secrets(vault).await?;
        config.validate()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            config_path: PathBuf::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn log_summary(&self) {
        tracing::info!(
            config = %self.config_path.display(),
            llm = %self.config.llm.provider,
            model = %self.config.llm.model,
            embedding = %self.config.embedding.provider,
            embedding_model = %self.config.embedding.model,
            top_k = self.config.index.top_k,
            "configuration loaded"
        );
    }

    /// Chat provider plus the receiver for its status messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing or the HTTP client cannot be built.
    pub async fn build_provider(
        &self,
    ) -> Result<(AnyProvider, mpsc::UnboundedReceiver<String>), StartupError> {
        let mut provider = create_provider(&self.config)?;
        let (status_tx, status_rx) = mpsc::unbounded_channel::<String>();
        provider.set_status_tx(status_tx);
        health_check(&provider).await;
        Ok((provider, status_rx))
    }

    /// # Errors
    ///
    /// Returns an error if the embedding backend cannot be constructed.
    pub fn build_embedder(&self) -> Result<AnyEmbedder, StartupError> {
        create_embedder(&self.config)
    }

    /// Load the prebuilt index and check it was built with the configured embedder.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Index`] if the index is missing, corrupt or built with a
    /// different embedding model.
    pub fn load_index(&self, embedder: &impl Embedder) -> Result<Arc<VectorIndex>, StartupError> {
        let path = Path::new(&self.config.index.path);
        let index = VectorIndex::load(path)?;
        index.ensure_model(embedder.model_name())?;
        Ok(Arc::new(index))
    }

    #[must_use]
    pub fn build_pipeline(
        &self,
        provider: AnyProvider,
        embedder: AnyEmbedder,
        index: Arc<VectorIndex>,
    ) -> Pipeline {
        let retriever = Retriever::new(embedder, index, self.config.index.top_k);
        RagPipeline::new(provider, retriever)
            .with_prompts(self.config.prompts.clone())
            .with_generation_config(&self.config.generation)
    }

    #[must_use]
    pub fn splitter_config(&self) -> SplitterConfig {
        SplitterConfig {
            chunk_size: self.config.index.chunk_size,
            chunk_overlap: self.config.index.chunk_overlap,
            sentence_aware: true,
        }
    }

    pub fn build_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }
}

/// `--config` wins, then `MEDBOT_CONFIG`, then `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }
    if let Ok(path) = std::env::var("MEDBOT_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

pub async fn health_check(provider: &AnyProvider) {
    match provider {
        AnyProvider::Ollama(ollama) => match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        },
        AnyProvider::Compatible(p) => {
            tracing::info!(model = %p.model(), "using OpenAI-compatible chat endpoint");
        }
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

/// # Errors
///
/// Returns an error if a required credential is missing or the HTTP client fails.
pub fn create_provider(config: &Config) -> Result<AnyProvider, StartupError> {
    match config.llm.provider {
        ProviderKind::Compatible => {
            let key = config.llm_api_key()?;
            let client =
                medbot_llm::http::build_client(Duration::from_secs(config.timeouts.llm_seconds))?;
            let provider = CompatibleProvider::new(
                client,
                config.llm.provider_name.clone(),
                key.expose(),
                config.llm.base_url.clone(),
                config.llm.model.clone(),
            )
            .with_max_tokens(config.llm.max_tokens)
            .with_temperature(config.llm.temperature)
            .with_max_retries(config.llm.rate_limit_retries);
            Ok(AnyProvider::Compatible(provider))
        }
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.embedding.model.clone(),
        ))),
    }
}

/// # Errors
///
/// Returns an error if the backend needs a missing credential, the model cannot be
/// loaded, or the backend was not compiled in.
pub fn create_embedder(config: &Config) -> Result<AnyEmbedder, StartupError> {
    match config.embedding.provider {
        EmbeddingProviderKind::Ollama => Ok(AnyEmbedder::Ollama(OllamaProvider::new(
            &config.embedding.base_url,
            config.llm.model.clone(),
            config.embedding.model.clone(),
        ))),
        EmbeddingProviderKind::Compatible => {
            let key = config.llm_api_key()?;
            let client = medbot_llm::http::build_client(Duration::from_secs(
                config.timeouts.embedding_seconds,
            ))?;
            let provider = CompatibleProvider::new(
                client,
                config.llm.provider_name.clone(),
                key.expose(),
                config.llm.base_url.clone(),
                config.llm.model.clone(),
            )
            .with_embedding_model(config.embedding.model.clone());
            Ok(AnyEmbedder::Compatible(provider))
        }
        #[cfg(feature = "candle")]
        EmbeddingProviderKind::Candle => {
            let device = medbot_llm::candle_embed::select_device(&config.embedding.device)?;
            let embedder = medbot_llm::candle_embed::CandleEmbedder::load(
                &config.embedding.model,
                &device,
            )?;
            Ok(AnyEmbedder::Candle(embedder))
        }
        #[cfg(not(feature = "candle"))]
        EmbeddingProviderKind::Candle => Err(ConfigError::Invalid(
            "embedding.provider = \"candle\" requires the `candle` feature".into(),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use medbot_llm::LlmProvider;
    use medbot_llm::mock::MockEmbedder;
    use medbot_memory::{ChunkId, DocumentChunk, IndexError};
    use serial_test::serial;

    use super::*;
    use crate::vault::MockVaultProvider;

    fn index_dir(embedder: &MockEmbedder) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![DocumentChunk {
            id: ChunkId(0),
            source: "flu.txt".into(),
            chunk_index: 0,
            content: "Flu causes fever".into(),
            embedding: embedder.vector("Flu causes fever"),
        }];
        let mut index = VectorIndex::from_chunks("mock-embed", chunks).unwrap();
        index.save(&dir.path().join("faiss_index")).unwrap();
        dir
    }

    fn builder_with_index(path: &Path) -> AppBuilder {
        let mut config = Config::default();
        config.index.path = path.to_string_lossy().into_owned();
        AppBuilder::from_config(config)
    }

    #[test]
    #[serial]
    fn resolve_config_path_precedence() {
        unsafe { std::env::set_var("MEDBOT_CONFIG", "/etc/medbot.toml") };
        assert_eq!(resolve_config_path(None), PathBuf::from("/etc/medbot.toml"));
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("local.toml"))),
            PathBuf::from("local.toml")
        );
        unsafe { std::env::remove_var("MEDBOT_CONFIG") };
        assert_eq!(resolve_config_path(None), PathBuf::from("config/default.toml"));
    }

    #[tokio::test]
    async fn load_resolves_secrets_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medbot.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "[index]\ntop_k = 4\n").unwrap();

        let vault = MockVaultProvider::new().with_secret("GROQ_API_KEY", "gsk-test");
        let app = AppBuilder::load(path.clone(), &vault).await.unwrap();

        assert_eq!(app.config_path(), path.as_path());
        assert_eq!(app.config().index.top_k, 4);
        assert_eq!(app.config().llm_api_key().unwrap().expose(), "gsk-test");
    }

    #[tokio::test]
    async fn load_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medbot.toml");
        std::fs::write(&path, "[index]\ntop_k = 0\n").unwrap();

        let err = AppBuilder::load(path, &MockVaultProvider::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn compatible_provider_without_key_is_configuration_error() {
        let err = create_provider(&Config::default()).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::MissingCredential { .. })
        ));
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn compatible_provider_with_key() {
        let mut config = Config::default();
        config.secrets.llm_api_key = Some(crate::vault::Secret::new("gsk-test"));
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "groq");
        assert!(matches!(provider, AnyProvider::Compatible(_)));
    }

    #[test]
    fn ollama_provider_needs_no_key() {
        let mut config = Config::default();
        config.llm.provider = ProviderKind::Ollama;
        config.llm.base_url = "http://localhost:11434".into();
        assert!(matches!(
            create_provider(&config).unwrap(),
            AnyProvider::Ollama(_)
        ));
    }

    #[test]
    fn default_embedder_is_ollama_all_minilm() {
        let embedder = create_embedder(&Config::default()).unwrap();
        assert_eq!(embedder.model_name(), "all-minilm");
    }

    #[cfg(not(feature = "candle"))]
    #[test]
    fn candle_embedder_requires_feature() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProviderKind::Candle;
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn load_index_checks_embedding_model() {
        let embedder = MockEmbedder::new(32);
        let dir = index_dir(&embedder);
        let app = builder_with_index(&dir.path().join("faiss_index"));

        let index = app.load_index(&embedder).unwrap();
        assert_eq!(index.len(), 1);

        let other = create_embedder(app.config()).unwrap();
        let err = app.load_index(&other).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Index(IndexError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn missing_index_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = builder_with_index(&dir.path().join("faiss_index"));
        let err = app.load_index(&MockEmbedder::new(8)).unwrap_err();
        assert!(matches!(err, StartupError::Index(IndexError::NotFound(_))));
    }

    #[test]
    fn splitter_config_follows_index_section() {
        let mut config = Config::default();
        config.index.chunk_size = 500;
        config.index.chunk_overlap = 50;
        let splitter = AppBuilder::from_config(config).splitter_config();
        assert_eq!(splitter.chunk_size, 500);
        assert_eq!(splitter.chunk_overlap, 50);
    }
}
