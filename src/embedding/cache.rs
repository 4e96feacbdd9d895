/// Read-through embedding cache keyed by (model, text sent to the provider).
///
/// Query labels repeat heavily across a migration batch ("Sports", "News"),
/// so the semantic stage wraps its provider in a `CachedEmbedder`. The cache
/// is bounded; when full it is cleared wholesale rather than tracking recency.
/// Callers normalize before embedding; the cache never folds distinct texts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{EmbeddingError, EmbeddingProvider};

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    entries: Mutex<HashMap<(String, String), Arc<Vec<f32>>>>,
    capacity: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        CachedEmbedder {
            inner,
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn key(&self, text: &str) -> (String, String) {
        (self.inner.model_name().to_string(), text.to_string())
    }

    fn lookup(&self, key: &(String, String)) -> Option<Vec<f32>> {
        self.entries
            .lock()
            .ok()
            .and_then(|map| map.get(key).map(|v| v.as_ref().clone()))
    }

    fn store(&self, key: (String, String), vector: &[f32]) {
        if let Ok(mut map) = self.entries.lock() {
            if map.len() >= self.capacity {
                map.clear();
            }
            map.insert(key, Arc::new(vector.to_vec()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = self.key(text);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.store(key, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let keys: Vec<(String, String)> = texts.iter().map(|t| self.key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::Generation(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (&i, vector) in missing.iter().zip(vectors) {
                self.store(keys[i].clone(), &vector);
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| EmbeddingError::Generation("provider returned too few vectors".to_string())))
            .collect()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
