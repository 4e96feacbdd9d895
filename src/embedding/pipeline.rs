/// Batched embedding of catalog labels at startup.
///
/// Texts are cut into `batch_size` chunks; at most `concurrency` chunks are in
/// flight at once (a Semaphore gates the JoinSet). Chunks finish in any order
/// and are reassembled by chunk index, so the output lines up with the input.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{EmbeddingError, EmbeddingProvider};

pub async fn embed_all(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let batch_size = batch_size.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = texts.len();

    let mut tasks: JoinSet<(usize, Result<Vec<Vec<f32>>, EmbeddingError>)> = JoinSet::new();
    for (chunk_idx, chunk) in texts.chunks(batch_size).enumerate() {
        let chunk = chunk.to_vec();
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(e) => return (chunk_idx, Err(EmbeddingError::Generation(e.to_string()))),
            };
            (chunk_idx, provider.embed_batch(&chunk).await)
        });
    }

    let chunk_count = total.div_ceil(batch_size);
    let mut chunks: Vec<Option<Vec<Vec<f32>>>> = vec![None; chunk_count];
    while let Some(joined) = tasks.join_next().await {
        let (chunk_idx, result) = joined.map_err(|e| EmbeddingError::Generation(e.to_string()))?;
        match result {
            Ok(vectors) => {
                let expected = batch_size.min(total - chunk_idx * batch_size);
                if vectors.len() != expected {
                    tasks.abort_all();
                    return Err(EmbeddingError::Generation(format!(
                        "Chunk {} returned {} vectors for {} texts",
                        chunk_idx,
                        vectors.len(),
                        expected
                    )));
                }
                chunks[chunk_idx] = Some(vectors);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    let vectors: Vec<Vec<f32>> = chunks.into_iter().flatten().flatten().collect();
    if vectors.len() != total {
        return Err(EmbeddingError::Generation(format!(
            "Embedded {} of {} texts",
            vectors.len(),
            total
        )));
    }

    tracing::debug!(
        model = provider.model_name(),
        texts = total,
        chunks = chunk_count,
        "Embedding batch complete"
    );
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps longer for earlier chunks so completion order is reversed.
    struct SlowEmbedder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![text.parse::<f32>().unwrap_or(-1.0)])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let first: u64 = texts[0].parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(first * 2))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Generation("boom".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_order_preserved_and_concurrency_bounded() {
        let provider = Arc::new(SlowEmbedder { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let texts: Vec<String> = (0..17).map(|i| i.to_string()).collect();
        let out = embed_all(provider.clone(), texts, 4, 2).await.unwrap();
        let values: Vec<f32> = out.iter().map(|v| v[0]).collect();
        let expected: Vec<f32> = (0..17).map(|i| i as f32).collect();
        assert_eq!(values, expected);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(embed_all(Arc::new(FailingEmbedder), texts, 1, 2).await.is_err());
    }

    /// First chunk gets one vector too many, the others one too few.
    struct Lopsided;

    #[async_trait]
    impl EmbeddingProvider for Lopsided {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = if texts[0] == "0" { texts.len() + 1 } else { texts.len() - 1 };
            Ok(vec![vec![0.0]; n])
        }

        fn model_name(&self) -> &str {
            "lopsided"
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_chunk_length_mismatch_rejected() {
        let texts: Vec<String> = (0..4).map(|i| i.to_string()).collect();
        let err = embed_all(Arc::new(Lopsided), texts, 2, 1).await.unwrap_err();
        assert!(err.to_string().contains("vectors for 2 texts"));
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert!(embed_all(Arc::new(FailingEmbedder), Vec::new(), 8, 2).await.unwrap().is_empty());
    }
}
