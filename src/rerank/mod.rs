/// LLM re-rank provider trait and supporting types
///
/// Provides a pluggable interface for re-ordering a candidate pool with an LLM.
/// Supports Ollama (local, default, no API key) and OpenAI-compatible APIs.
///
/// The oracle only ever changes ORDER. Scores stay those of the stage that
/// produced each candidate, and any failure (timeout, HTTP, bad JSON) leaves
/// the pool in its original order.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::config::RerankConfig;
use crate::errors::MapperError;
use crate::matching::Candidate;

/// Errors that can occur during re-rank operations.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Inference or JSON parse failure
    #[error("Rerank generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key or model)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Operation exceeded latency budget
    #[error("Rerank timeout: {0}")]
    Timeout(String),
}

impl From<RerankError> for MapperError {
    fn from(e: RerankError) -> Self {
        MapperError::Internal(e.to_string())
    }
}

/// A candidate category as presented to the LLM.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// Target node id
    pub id: String,
    pub label: String,
    /// Full path, " > " joined
    pub path: String,
    /// Current rank in the cascade pool (1-indexed, lower = more relevant)
    pub current_rank: usize,
}

/// A re-ranked candidate from the LLM.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub id: String,
    /// New rank assigned by LLM (1-indexed, lower = more relevant)
    pub llm_rank: usize,
}

/// Core trait for LLM-based candidate re-ranking.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn RerankProvider>).
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Re-rank candidates, returning ids in LLM-preferred order.
    async fn rerank(
        &self,
        label: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<RankedResult>, RerankError>;

    /// Return the model name identifier used by this provider.
    fn model_name(&self) -> &str;
}

/// Build the re-ranking prompt.
///
/// Instructs the LLM to order candidate categories by how well each one
/// describes the legacy category label.
pub fn build_reranking_prompt(label: &str, candidates_json: &str) -> String {
    format!(
        "You are migrating content categories from an older advertising taxonomy to a newer one.\n\
         Given a legacy category label and a list of candidate categories from the new taxonomy, \
         order the candidates from the best replacement to the worst.\n\n\
         Output only valid JSON matching the provided schema: \
         {{\"ranked_ids\": [\"id1\", \"id2\", ...]}}. \
         Include ALL candidate IDs. Do not add commentary.\n\n\
         Legacy label: {label}\n\n\
         Candidates:\n{candidates_json}"
    )
}

/// JSON schema for re-ranking output.
///
/// `ranked_ids` must contain all candidate IDs, best replacement first.
pub fn reranking_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "ranked_ids": {
                "type": "array",
                "items": { "type": "string" },
                "description": "All candidate IDs ordered from best to worst replacement"
            }
        },
        "required": ["ranked_ids"]
    })
}

/// Serialize candidates into the JSON array embedded in the prompt.
pub(crate) fn candidates_json(candidates: &[RerankCandidate]) -> Result<String, RerankError> {
    let arr: Vec<serde_json::Value> = candidates
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "label": c.label,
                "path": c.path,
                "rank": c.current_rank
            })
        })
        .collect();
    serde_json::to_string(&arr)
        .map_err(|e| RerankError::Generation(format!("Failed to serialize candidates: {}", e)))
}

/// Parse `{"ranked_ids": [...]}` from model output, dropping ids that were never offered.
pub(crate) fn parse_ranked_ids(
    content: &str,
    candidates: &[RerankCandidate],
) -> Result<Vec<RankedResult>, RerankError> {
    #[derive(serde::Deserialize)]
    struct RerankOutput {
        #[serde(default)]
        ranked_ids: Vec<String>,
    }

    let output: RerankOutput = serde_json::from_str(content).map_err(|e| {
        RerankError::Generation(format!(
            "Failed to parse rerank JSON from model output: {} (content: {})",
            e, content
        ))
    })?;

    let valid_ids: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    Ok(output
        .ranked_ids
        .into_iter()
        .filter(|id| valid_ids.contains(id.as_str()) && seen.insert(id.clone()))
        .enumerate()
        .map(|(idx, id)| RankedResult { id, llm_rank: idx + 1 })
        .collect())
}

/// Result of one re-rank attempt.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,
    /// True only when the oracle answered in time and its order was applied
    pub reranked: bool,
    pub note: Option<String>,
}

/// Re-rank oracle with its latency budget.
pub struct Reranker {
    provider: Arc<dyn RerankProvider>,
    endpoint: String,
    timeout: Duration,
    candidate_limit: usize,
}

impl Reranker {
    pub fn new(
        provider: Arc<dyn RerankProvider>,
        endpoint: impl Into<String>,
        timeout: Duration,
        candidate_limit: usize,
    ) -> Self {
        Reranker {
            provider,
            endpoint: endpoint.into(),
            timeout,
            candidate_limit: candidate_limit.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn candidate_limit(&self) -> usize {
        self.candidate_limit
    }

    /// Re-order `pool`. Ids the oracle omits keep their original relative
    /// order after the ones it ranked; candidates past `candidate_limit` are
    /// never sent and stay at the tail.
    pub async fn rerank(&self, label: &str, pool: Vec<Candidate>, catalog: &Catalog) -> RerankOutcome {
        if pool.len() < 2 {
            return RerankOutcome { candidates: pool, reranked: false, note: None };
        }

        let sent: Vec<RerankCandidate> = pool
            .iter()
            .take(self.candidate_limit)
            .enumerate()
            .map(|(i, c)| {
                let node = catalog.get(&c.target_id);
                RerankCandidate {
                    id: c.target_id.clone(),
                    label: node.map(|n| n.label.clone()).unwrap_or_default(),
                    path: node.map(|n| n.path.join(" > ")).unwrap_or_default(),
                    current_rank: i + 1,
                }
            })
            .collect();

        let call = self.provider.rerank(label, &sent);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(RerankError::Timeout(format!("no answer within {}ms", self.timeout.as_millis()))),
        };

        match result {
            Ok(ranked) if !ranked.is_empty() => {
                let mut remaining: Vec<Option<Candidate>> = pool.into_iter().map(Some).collect();
                let mut ordered: Vec<Candidate> = Vec::with_capacity(remaining.len());
                for r in ranked {
                    if let Some(slot) = remaining
                        .iter_mut()
                        .find(|slot| slot.as_ref().is_some_and(|c| c.target_id == r.id))
                    {
                        if let Some(c) = slot.take() {
                            ordered.push(c);
                        }
                    }
                }
                ordered.extend(remaining.into_iter().flatten());
                for (i, c) in ordered.iter_mut().enumerate() {
                    c.rank = i + 1;
                }
                RerankOutcome { candidates: ordered, reranked: true, note: None }
            }
            Ok(_) => RerankOutcome {
                candidates: pool,
                reranked: false,
                note: Some("rerank returned no usable ids; kept cascade order".to_string()),
            },
            Err(e) => {
                tracing::warn!(model = self.provider.model_name(), error = %e, "Rerank failed, keeping cascade order");
                RerankOutcome {
                    candidates: pool,
                    reranked: false,
                    note: Some(format!("rerank unavailable: {}", e)),
                }
            }
        }
    }
}

/// Create the re-rank oracle based on configuration.
pub fn create_reranker(
    config: &RerankConfig,
    model: &str,
    endpoint: &str,
) -> Result<Reranker, RerankError> {
    let provider: Arc<dyn RerankProvider> = match config.provider.as_str() {
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                RerankError::NotConfigured(
                    "OpenAI API key required when rerank provider is 'openai'. \
                     Set TAXOMAP_RERANK__OPENAI_API_KEY or rerank.openai_api_key in taxomap.toml"
                        .to_string(),
                )
            })?;
            Arc::new(openai::OpenAIRerankProvider::new(
                endpoint.trim_end_matches('/').to_string(),
                api_key,
                model.to_string(),
            )?)
        }
        "ollama" => Arc::new(ollama::OllamaRerankProvider::new(
            endpoint.trim_end_matches('/').to_string(),
            model.to_string(),
        )),
        other => {
            return Err(RerankError::NotConfigured(format!(
                "Unknown rerank provider '{}' (expected 'ollama' or 'openai')",
                other
            )))
        }
    };
    Ok(Reranker::new(
        provider,
        endpoint,
        Duration::from_millis(config.timeout_ms),
        config.candidate_limit,
    ))
}
