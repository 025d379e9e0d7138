// embeddings/openai.rs
// OpenAI embeddings client (text-embedding-3-small)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Default model and its dimensionality
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

/// Max texts per batch request
pub(super) const MAX_BATCH_SIZE: usize = 256;

/// Max characters per text (roughly 8k tokens)
const MAX_TEXT_CHARS: usize = 8192 * 4;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, dimensions: Option<usize>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions: dimensions.unwrap_or(DEFAULT_DIMENSIONS),
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
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response from OpenAI"))
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
            "dimensions": self.dimensions,
        });

        let response = self
            .http_client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI embedding request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embedding request failed ({}): {}", status, body_text);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embedding response")?;

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = OpenAiEmbeddings::new("sk-test".to_string(), None, Duration::from_secs(30));
        assert_eq!(client.dimensions(), DEFAULT_DIMENSIONS);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_custom_dimensions() {
        let client =
            OpenAiEmbeddings::new("sk-test".to_string(), Some(256), Duration::from_secs(30));
        assert_eq!(client.dimensions(), 256);
    }
}
