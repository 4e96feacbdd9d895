/// Ollama re-rank provider
///
/// Calls the Ollama /api/chat endpoint with a structured JSON output schema.
/// No API key required; designed for self-hosted Ollama deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    build_reranking_prompt, candidates_json, parse_ranked_ids, reranking_schema, RankedResult,
    RerankCandidate, RerankError, RerankProvider,
};

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    format: serde_json::Value,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

/// Ollama-backed re-rank provider.
pub struct OllamaRerankProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaRerankProvider {
    /// # Arguments
    /// * `base_url` - Ollama server base URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "llama3.1:8b")
    pub fn new(base_url: String, model: String) -> Self {
        OllamaRerankProvider {
            client: reqwest::Client::new(),
            base_url,
            model,
        }
    }

    /// POST to Ollama /api/chat with a given prompt and schema, return content string.
    async fn chat(&self, prompt: String, schema: serde_json::Value) -> Result<String, RerankError> {
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
            format: schema,
        };

        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RerankError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RerankError::Api { status, message: body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Generation(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl RerankProvider for OllamaRerankProvider {
    async fn rerank(
        &self,
        label: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<RankedResult>, RerankError> {
        let prompt = build_reranking_prompt(label, &candidates_json(candidates)?);
        let content = self.chat(prompt, reranking_schema()).await?;
        parse_ranked_ids(&content, candidates)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_generation_error() {
        // Port 9 (discard) is never an Ollama server.
        let p = OllamaRerankProvider::new("http://127.0.0.1:9".to_string(), "llama3.1:8b".to_string());
        let candidates = vec![RerankCandidate {
            id: "1".to_string(),
            label: "Sports".to_string(),
            path: "Sports".to_string(),
            current_rank: 1,
        }];
        assert!(matches!(p.rerank("sports", &candidates).await, Err(RerankError::Generation(_))));
    }
}
