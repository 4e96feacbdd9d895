/// Local embedding provider using fastembed
///
/// Provides offline embedding generation. No API key required; model weights
/// are downloaded once and cached under `embedding.cache_dir`.
/// All CPU-bound fastembed calls are wrapped in spawn_blocking to avoid blocking async runtime.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task;

use super::{EmbeddingError, EmbeddingProvider};

/// Model ids accepted in `embedding_model_id`.
pub fn resolve_model(model_id: &str) -> Option<EmbeddingModel> {
    match model_id {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => Some(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
        _ => None,
    }
}

/// Local embedding provider backed by fastembed.
///
/// `TextEmbedding::embed` takes `&mut self`, so the model sits behind a Mutex
/// and every call runs on the blocking pool.
pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
    dim: usize,
}

impl LocalEmbeddingProvider {
    /// Create a new LocalEmbeddingProvider, downloading model weights if not cached.
    ///
    /// # Arguments
    /// * `cache_dir` - Directory to cache model weights (fastembed downloads on first use)
    /// * `model_id` - One of the names accepted by `resolve_model`
    pub async fn new(cache_dir: &str, model_id: &str) -> Result<Self, EmbeddingError> {
        let model = resolve_model(model_id).ok_or_else(|| {
            EmbeddingError::NotConfigured(format!(
                "Unsupported local embedding model '{}'. Supported: all-MiniLM-L6-v2, \
                 all-MiniLM-L12-v2, bge-small-en-v1.5, nomic-embed-text-v1.5",
                model_id
            ))
        })?;
        let dim = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|info| info.model == model)
            .map(|info| info.dim)
            .unwrap_or(384);

        let cache_path = PathBuf::from(cache_dir);
        let embedding = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Failed to create cache dir: {}", e)))?;
            let options = InitOptions::new(model)
                .with_cache_dir(cache_path)
                .with_show_download_progress(false);
            TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelInit(format!("fastembed init: {}", e)))
        })
        .await
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))??;

        tracing::info!(model = model_id, dimension = dim, "Local embedding model ready");

        Ok(LocalEmbeddingProvider {
            model: Arc::new(Mutex::new(embedding)),
            name: model_id.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("fastembed returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let owned = texts.to_vec();
        let expected = owned.len();
        let vectors = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| EmbeddingError::Generation(format!("fastembed lock poisoned: {}", e)))?;
            guard
                .embed(owned, None)
                .map_err(|e| EmbeddingError::Generation(format!("fastembed embed: {}", e)))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(e.to_string()))??;

        if vectors.len() != expected {
            return Err(EmbeddingError::Generation(format!(
                "fastembed returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
