/// Semantic matching against precomputed catalog label embeddings.
///
/// Catalog vectors are computed once when the matcher is built. At query
/// time only the record label is embedded (through the read-through cache).
/// Both sides are embedded in normalized form.
/// Cosine similarity is clamped to [0, 1] and used directly as confidence.

use std::sync::Arc;

use super::{rank_candidates, Candidate, MatchQuery, Method};
use crate::catalog::Catalog;
use crate::embedding::cache::CachedEmbedder;
use crate::embedding::pipeline::embed_all;
use crate::embedding::{cosine_similarity, EmbeddingError, EmbeddingProvider};

const QUERY_CACHE_CAPACITY: usize = 10_000;

pub struct SemanticMatcher {
    embedder: Arc<CachedEmbedder>,
    vectors: Vec<Vec<f32>>,
}

impl SemanticMatcher {
    pub async fn build(
        provider: Arc<dyn EmbeddingProvider>,
        catalog: &Catalog,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<SemanticMatcher, EmbeddingError> {
        let embedder = Arc::new(CachedEmbedder::new(provider, QUERY_CACHE_CAPACITY));
        let labels: Vec<String> = (0..catalog.len())
            .map(|idx| catalog.normalized_label(idx).as_str().to_string())
            .collect();
        let vectors = embed_all(embedder.clone(), labels, batch_size, concurrency).await?;

        let dim = embedder.dimension();
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(EmbeddingError::Generation(format!(
                "Catalog node {} embedded to {} dimensions, expected {}",
                catalog.node(bad).id,
                vectors[bad].len(),
                dim
            )));
        }

        tracing::info!(
            model = embedder.model_name(),
            nodes = vectors.len(),
            dimension = dim,
            "Catalog embeddings ready"
        );
        Ok(SemanticMatcher { embedder, vectors })
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub async fn search(
        &self,
        query: &MatchQuery<'_>,
        catalog: &Catalog,
        top_k: usize,
    ) -> Result<Vec<Candidate>, EmbeddingError> {
        let q = self.embedder.embed(query.label.as_str()).await?;
        if q.len() != self.embedder.dimension() {
            return Err(EmbeddingError::Generation(format!(
                "Query embedded to {} dimensions, expected {}",
                q.len(),
                self.embedder.dimension()
            )));
        }

        let pool = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(idx, _)| query.eligible(catalog, *idx))
            .filter_map(|(idx, v)| {
                let cos = cosine_similarity(&q, v);
                (cos > 0.0).then(|| Candidate::new(catalog.node(idx).id.clone(), cos, cos, Method::Embedding))
            })
            .collect();
        Ok(rank_candidates(pool, catalog, top_k))
    }
}
