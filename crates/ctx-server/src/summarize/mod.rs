// summarize/mod.rs
// Summarization providers with ordered fallback and a template terminus

mod ollama;
mod template;

pub use ollama::OllamaSummarizer;
pub use template::template_summary;

use crate::db::Entity;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Options for a single summarize call.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub entity_type: String,
    pub name: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            entity_type: "entity".to_string(),
            name: String::new(),
            max_tokens: 150,
            temperature: 0.2,
        }
    }
}

/// A decision parsed out of conversation text by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDecision {
    pub description: String,
    pub context: Option<String>,
    pub alternatives: Vec<String>,
}

/// Summarization provider capability.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap availability probe consulted before each attempt.
    async fn is_available(&self) -> bool;

    async fn summarize(&self, content: &str, opts: &SummarizeOptions) -> Result<String>;

    /// Structured decision extraction. Providers that cannot do this return
    /// Ok(None) and the caller falls back to the block-format parse of a
    /// plain summarize call.
    async fn extract_decisions(&self, _text: &str) -> Result<Option<Vec<ExtractedDecision>>> {
        Ok(None)
    }
}

/// Outcome of a batch summarization run.
#[derive(Debug, Default, Clone)]
pub struct SummarizeReport {
    pub summarized: usize,
    pub template_fallbacks: usize,
    /// (entity_id, error) per-entity failures; the run continues.
    pub failures: Vec<(String, String)>,
}

/// Ordered provider chain with retry and a deterministic template fallback.
pub struct SummarizerChain {
    providers: Vec<Arc<dyn SummarizationProvider>>,
    max_retries: usize,
    base_backoff: Duration,
    timeout: Duration,
}

impl SummarizerChain {
    pub fn new(providers: Vec<Arc<dyn SummarizationProvider>>) -> Self {
        Self {
            providers,
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_retries(mut self, max_retries: usize, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Summarize content, walking the fallback list.
    ///
    /// Each available provider gets `max_retries` attempts with exponential
    /// backoff. When everything fails (or no provider is configured) the
    /// deterministic template summary is returned; this call never errors.
    pub async fn summarize(&self, content: &str, opts: &SummarizeOptions) -> (String, bool) {
        for provider in &self.providers {
            if !provider.is_available().await {
                tracing::debug!(provider = provider.name(), "summarizer unavailable, skipping");
                continue;
            }
            let mut backoff = self.base_backoff;
            for attempt in 1..=self.max_retries {
                match tokio::time::timeout(self.timeout, provider.summarize(content, opts)).await {
                    Ok(Ok(summary)) if !summary.trim().is_empty() => {
                        return (summary.trim().to_string(), false);
                    }
                    Ok(Ok(_)) => {
                        tracing::debug!(
                            provider = provider.name(),
                            "empty summary response, retrying"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            provider = provider.name(),
                            attempt,
                            "summarize failed: {}",
                            e
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            provider = provider.name(),
                            attempt,
                            "summarize timed out after {:?}",
                            self.timeout
                        );
                    }
                }
                if attempt < self.max_retries {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        (template_summary(&opts.entity_type, &opts.name, None, content), true)
    }

    /// First provider that reports structured decision extraction.
    pub async fn extract_decisions(&self, text: &str) -> Result<Option<Vec<ExtractedDecision>>> {
        for provider in &self.providers {
            if !provider.is_available().await {
                continue;
            }
            match tokio::time::timeout(self.timeout, provider.extract_decisions(text)).await {
                Ok(Ok(Some(decisions))) => return Ok(Some(decisions)),
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(provider = provider.name(), "extract_decisions failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(provider = provider.name(), "extract_decisions timed out");
                }
            }
        }
        Ok(None)
    }

    /// Summarize a batch of entities, recording per-entity failures without
    /// aborting the run.
    pub async fn summarize_entities(&self, entities: &[Entity]) -> (Vec<(String, String)>, SummarizeReport) {
        let mut report = SummarizeReport::default();
        let mut summaries = Vec::new();

        for entity in entities {
            let Some(content) = entity.content.as_deref().filter(|c| !c.trim().is_empty()) else {
                report.failures.push((entity.id.clone(), "no content".to_string()));
                continue;
            };
            let opts = SummarizeOptions {
                entity_type: entity.entity_type.clone(),
                name: entity.name.clone(),
                ..Default::default()
            };
            let (summary, used_template) = self.summarize(content, &opts).await;
            if used_template {
                report.template_fallbacks += 1;
            }
            report.summarized += 1;
            summaries.push((entity.id.clone(), summary));
        }

        (summaries, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SummarizationProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn summarize(&self, _content: &str, _opts: &SummarizeOptions) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient failure");
            }
            Ok("a concise summary".to_string())
        }
    }

    struct OfflineProvider;

    #[async_trait]
    impl SummarizationProvider for OfflineProvider {
        fn name(&self) -> &'static str {
            "offline"
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn summarize(&self, _content: &str, _opts: &SummarizeOptions) -> Result<String> {
            anyhow::bail!("should never be called");
        }
    }

    fn opts() -> SummarizeOptions {
        SummarizeOptions {
            entity_type: "function".to_string(),
            name: "hello".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let chain = SummarizerChain::new(vec![Arc::new(FlakyProvider {
            fail_first: 2,
            calls: AtomicUsize::new(0),
        })])
        .with_retries(3, Duration::from_millis(1));

        let (summary, used_template) = chain.summarize("fn hello() {}", &opts()).await;
        assert_eq!(summary, "a concise summary");
        assert!(!used_template);
    }

    #[tokio::test]
    async fn test_template_fallback_when_all_fail() {
        let chain = SummarizerChain::new(vec![Arc::new(FlakyProvider {
            fail_first: 100,
            calls: AtomicUsize::new(0),
        })])
        .with_retries(2, Duration::from_millis(1));

        let (summary, used_template) = chain.summarize("fn hello() { return 1 }", &opts()).await;
        assert!(used_template);
        assert!(summary.contains("hello"));
    }

    #[tokio::test]
    async fn test_unavailable_provider_skipped() {
        let chain = SummarizerChain::new(vec![
            Arc::new(OfflineProvider) as Arc<dyn SummarizationProvider>,
            Arc::new(FlakyProvider {
                fail_first: 0,
                calls: AtomicUsize::new(0),
            }),
        ])
        .with_retries(1, Duration::from_millis(1));

        let (summary, used_template) = chain.summarize("content", &opts()).await;
        assert_eq!(summary, "a concise summary");
        assert!(!used_template);
    }

    #[tokio::test]
    async fn test_no_providers_uses_template() {
        let chain = SummarizerChain::new(vec![]);
        let (summary, used_template) = chain.summarize("def f(): pass", &opts()).await;
        assert!(used_template);
        assert!(!summary.is_empty());
    }
}
