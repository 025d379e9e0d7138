// summarize/ollama.rs
// Ollama chat-based summarizer (OpenAI-compatible endpoint)

use super::{ExtractedDecision, SummarizationProvider, SummarizeOptions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct OllamaSummarizer {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaSummarizer {
    pub fn new(base_url: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: usize, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Ollama chat request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama chat request failed ({}): {}", status, body_text);
        }

        let resp: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama chat response")?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Empty chat response from Ollama"))
    }
}

#[async_trait]
impl SummarizationProvider for OllamaSummarizer {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http_client.get(&url).timeout(Duration::from_secs(2)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn summarize(&self, content: &str, opts: &SummarizeOptions) -> Result<String> {
        let system = "You summarize code and documents for a retrieval index. \
                      Reply with one or two plain sentences, no preamble.";
        let user = format!(
            "Summarize this {} named '{}':\n\n{}",
            opts.entity_type, opts.name, content
        );
        self.chat(system, &user, opts.max_tokens, opts.temperature).await
    }

    async fn extract_decisions(&self, text: &str) -> Result<Option<Vec<ExtractedDecision>>> {
        let system = "You extract technical decisions from conversation text. \
                      For each decision output a block:\n\
                      DECISION: <what was decided>\n\
                      CONTEXT: <why, optional>\n\
                      ALTERNATIVES: <comma-separated, optional>\n\
                      Separate blocks with a blank line. \
                      If there are no decisions, output exactly NO_DECISIONS.";
        let response = self.chat(system, text, 400, 0.1).await?;
        Ok(Some(parse_decision_blocks(&response)))
    }
}

/// Parse DECISION/CONTEXT/ALTERNATIVES blocks out of a provider response.
/// `NO_DECISIONS` (or anything without a DECISION line) yields an empty list.
pub fn parse_decision_blocks(response: &str) -> Vec<ExtractedDecision> {
    if response.trim() == "NO_DECISIONS" {
        return Vec::new();
    }

    let mut decisions = Vec::new();
    let mut current: Option<ExtractedDecision> = None;

    for line in response.lines() {
        let line = line.trim();
        if let Some(desc) = line.strip_prefix("DECISION:") {
            if let Some(decision) = current.take() {
                decisions.push(decision);
            }
            let desc = desc.trim();
            if !desc.is_empty() {
                current = Some(ExtractedDecision {
                    description: desc.to_string(),
                    context: None,
                    alternatives: Vec::new(),
                });
            }
        } else if let Some(ctx) = line.strip_prefix("CONTEXT:") {
            if let Some(decision) = current.as_mut() {
                let ctx = ctx.trim();
                if !ctx.is_empty() {
                    decision.context = Some(ctx.to_string());
                }
            }
        } else if let Some(alts) = line.strip_prefix("ALTERNATIVES:") {
            if let Some(decision) = current.as_mut() {
                decision.alternatives = alts
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
            }
        }
    }
    if let Some(decision) = current.take() {
        decisions.push(decision);
    }
    decisions
}
