// embeddings/ollama.rs
// Ollama embeddings via OpenAI-compatible /v1/embeddings endpoint

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default Ollama embedding model
const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Default dimensions for nomic-embed-text
const DEFAULT_DIMENSIONS: usize = 768;

/// Max characters to embed (conservative limit for local models)
const MAX_TEXT_CHARS: usize = 8192 * 4;

/// Max texts per batch request
pub(super) const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Ollama embeddings client (OpenAI-compatible endpoint, no auth required)
pub struct OllamaEmbeddings {
    base_url: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(
        base_url: String,
        model: Option<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let dimensions = dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        let base_url = base_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            dimensions,
            http_client,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_texts(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response from Ollama"))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() <= MAX_BATCH_SIZE {
            return self.embed_texts(texts).await;
        }

        let mut all_results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            all_results.extend(self.embed_texts(chunk).await?);
        }
        Ok(all_results)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_TEXT_CHARS {
                    debug!(
                        "Truncating text from {} to {} chars for Ollama embedding",
                        t.len(),
                        MAX_TEXT_CHARS
                    );
                    let mut end = MAX_TEXT_CHARS;
                    while !t.is_char_boundary(end) {
                        end -= 1;
                    }
                    &t[..end]
                } else {
                    t.as_str()
                }
            })
            .collect();

        let body = serde_json::json!({
            "input": inputs,
            "model": self.model,
        });

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Ollama embedding request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embedding request failed ({}): {}", status, body_text);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embedding response")?;

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dimensions() {
        let client = OllamaEmbeddings::new(
            "http://localhost:11434".to_string(),
            None,
            None,
            Duration::from_secs(30),
        );
        assert_eq!(client.dimensions(), DEFAULT_DIMENSIONS);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_base_url_normalization() {
        let client = OllamaEmbeddings::new(
            "http://localhost:11434/".to_string(),
            None,
            None,
            Duration::from_secs(30),
        );
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
