/// OpenAI-compatible re-rank provider
///
/// Calls any OpenAI-compatible Chat Completions API with json_object response format.
/// The base_url comes from `mapping.rerank_endpoint`, so OpenAI itself and any
/// compatible gateway work. Requires an API key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    build_reranking_prompt, candidates_json, parse_ranked_ids, RankedResult, RerankCandidate,
    RerankError, RerankProvider,
};

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct OpenAIRerankProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIRerankProvider {
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - API key (must be non-empty)
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    ///
    /// # Errors
    /// Returns `RerankError::NotConfigured` if api_key is empty.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, RerankError> {
        if api_key.trim().is_empty() {
            return Err(RerankError::NotConfigured(
                "OpenAI API key is required when using the openai rerank provider. \
                 Set TAXOMAP_RERANK__OPENAI_API_KEY or rerank.openai_api_key in taxomap.toml"
                    .to_string(),
            ));
        }

        Ok(OpenAIRerankProvider {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        })
    }

    /// POST to {base_url}/chat/completions with json_object response format.
    async fn chat(&self, prompt: String) -> Result<String, RerankError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Generation(format!("Failed to parse OpenAI response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RerankError::Generation("OpenAI returned empty choices list".to_string()))
    }
}

#[async_trait]
impl RerankProvider for OpenAIRerankProvider {
    async fn rerank(
        &self,
        label: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<RankedResult>, RerankError> {
        let prompt = build_reranking_prompt(label, &candidates_json(candidates)?);
        let content = self.chat(prompt).await?;
        parse_ranked_ids(&content, candidates)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let err = OpenAIRerankProvider::new(
            "https://api.openai.com/v1".to_string(),
            " ".to_string(),
            "gpt-4o-mini".to_string(),
        );
        assert!(matches!(err, Err(RerankError::NotConfigured(_))));
    }
}
