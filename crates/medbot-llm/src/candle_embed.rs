//! In-process BERT sentence embeddings via candle.

use std::sync::Arc;

pub use candle_core::Device;
use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::error::LlmError;
use crate::provider::Embedder;

pub const DEFAULT_EMBEDDING_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

#[derive(Clone)]
pub struct CandleEmbedder {
    inner: Arc<BertEmbedder>,
    repo_id: String,
}

impl std::fmt::Debug for CandleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEmbedder")
            .field("repo_id", &self.repo_id)
            .field("device", &self.inner.device)
            .finish_non_exhaustive()
    }
}

impl CandleEmbedder {
    /// Download (or reuse the cached copy of) a BERT model from the `HuggingFace` Hub.
    ///
    /// # Errors
    ///
    /// Returns an error if model download or loading fails.
    pub fn load(repo_id: &str, device: &Device) -> Result<Self, LlmError> {
        let api = hf_hub::api::sync::Api::new().map_err(|e| {
            LlmError::ModelLoad(format!("failed to create HuggingFace API client: {e}"))
        })?;
        let repo = api.model(repo_id.to_owned());
        let fetch = |file: &str| {
            repo.get(file).map_err(|e| {
                LlmError::ModelLoad(format!("failed to download {file} from {repo_id}: {e}"))
            })
        };

        let config_path = fetch("config.json")?;
        let tokenizer_path = fetch("tokenizer.json")?;
        let weights_path = fetch("model.safetensors")?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| LlmError::ModelLoad(format!("failed to read BERT config: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| LlmError::ModelLoad(format!("failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file comes from the hf-hub cache and is not modified
        // while the VarBuilder holds the mapping
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(repo_id, ?device, "loaded candle embedding model");

        Ok(Self {
            inner: Arc::new(BertEmbedder {
                model,
                tokenizer,
                device: device.clone(),
            }),
            repo_id: repo_id.to_owned(),
        })
    }

    fn embed_sync(inner: &BertEmbedder, text: &str) -> Result<Vec<f32>, LlmError> {
        let encoding = inner
            .tokenizer
            .encode(text, true)
            .map_err(|e| LlmError::Inference(format!("tokenizer encode failed: {e}")))?;

        let token_ids = encoding.get_ids();
        let token_type_ids = vec![0u32; token_ids.len()];

        let input_ids = Tensor::new(token_ids, &inner.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(token_type_ids.as_slice(), &inner.device)?.unsqueeze(0)?;

        let embeddings = inner.model.forward(&input_ids, &token_type_ids, None)?;

        // mean pooling over the sequence, then L2 normalisation
        let seq_len = u32::try_from(embeddings.dim(1)?)
            .map_err(|e| LlmError::Inference(format!("sequence length overflow: {e}")))?;
        let mean_pooled = (embeddings.sum(1)? / f64::from(seq_len))?;
        let norm = mean_pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = mean_pooled.broadcast_div(&norm)?.squeeze(0)?;

        normalized.to_vec1::<f32>().map_err(LlmError::Candle)
    }
}

impl Embedder for CandleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || Self::embed_sync(&inner, &text))
            .await
            .map_err(|e| LlmError::Inference(format!("candle embedding task failed: {e}")))?
    }

    fn model_name(&self) -> &str {
        &self.repo_id
    }
}

/// Resolve a device preference (`cpu`, `cuda`, `metal`, `auto`).
///
/// # Errors
///
/// Returns an error if the requested accelerator is not compiled in or unavailable.
pub fn select_device(preference: &str) -> Result<Device, LlmError> {
    match preference {
        "metal" => {
            #[cfg(feature = "metal")]
            return Ok(Device::new_metal(0)?);
            #[cfg(not(feature = "metal"))]
            return Err(LlmError::ModelLoad(
                "candle compiled without metal feature".into(),
            ));
        }
        "cuda" => {
            #[cfg(feature = "cuda")]
            return Ok(Device::new_cuda(0)?);
            #[cfg(not(feature = "cuda"))]
            return Err(LlmError::ModelLoad(
                "candle compiled without cuda feature".into(),
            ));
        }
        "auto" => {
            #[cfg(feature = "metal")]
            if let Ok(device) = Device::new_metal(0) {
                return Ok(device);
            }
            #[cfg(feature = "cuda")]
            if let Ok(device) = Device::new_cuda(0) {
                return Ok(device);
            }
            Ok(Device::Cpu)
        }
        _ => Ok(Device::Cpu),
    }
}
