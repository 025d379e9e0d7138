// conversations/extraction.rs
// Two-stage decision extraction: pattern gate, then provider parse

use crate::summarize::{ExtractedDecision, SummarizerChain};
use once_cell::sync::Lazy;
use regex::Regex;

/// Phrases that mark a message as a decision candidate.
const DECISION_PHRASES: &[&str] = &[
    "we will",
    "we decided",
    "we should",
    "we agreed",
    "let's use",
    "let's go with",
    "the decision is",
    "the plan is",
    "i'll use",
    "chose",
    "choosing",
];

static DECISION_GATE: Lazy<Regex> = Lazy::new(|| {
    let alternation = DECISION_PHRASES
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    #[allow(clippy::expect_used)]
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("decision gate regex is static")
});

/// Stage 1: cheap word-boundary gate. Only matching messages are sent to a
/// provider.
pub fn matches_decision_pattern(text: &str) -> bool {
    DECISION_GATE.is_match(text)
}

/// Stage 2 with provider: structured parse. Without a capable provider the
/// heuristic sentence extraction keeps the pipeline functional.
pub async fn extract_decisions(
    chain: &SummarizerChain,
    text: &str,
) -> Vec<ExtractedDecision> {
    if !matches_decision_pattern(text) {
        return Vec::new();
    }

    match chain.extract_decisions(text).await {
        Ok(Some(decisions)) => decisions,
        Ok(None) => heuristic_decisions(text),
        Err(e) => {
            tracing::warn!("decision extraction provider failed, using heuristic: {}", e);
            heuristic_decisions(text)
        }
    }
}

/// Sentence-level fallback: each sentence containing a decision phrase
/// becomes one decision.
pub fn heuristic_decisions(text: &str) -> Vec<ExtractedDecision> {
    split_sentences(text)
        .into_iter()
        .filter(|sentence| DECISION_GATE.is_match(sentence))
        .map(|sentence| ExtractedDecision {
            description: sentence.trim().to_string(),
            context: None,
            alternatives: Vec::new(),
        })
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_matches_all_phrases() {
        for phrase in DECISION_PHRASES {
            let message = format!("Well, {} the new approach.", phrase);
            assert!(matches_decision_pattern(&message), "should match '{phrase}'");
        }
    }

    #[test]
    fn test_gate_case_insensitive() {
        assert!(matches_decision_pattern("We Decided to use PostgreSQL"));
        assert!(matches_decision_pattern("WE AGREED on the schema"));
    }

    #[test]
    fn test_gate_word_boundaries() {
        assert!(!matches_decision_pattern("the chosen1 variable"));
        assert!(matches_decision_pattern("we chose PostgreSQL"));
    }

    #[test]
    fn test_gate_rejects_plain_chatter() {
        assert!(!matches_decision_pattern("how does the indexer work?"));
        assert!(!matches_decision_pattern("here is the stack trace"));
    }

    #[test]
    fn test_heuristic_extracts_matching_sentence() {
        let text = "Some preamble. We decided to use PostgreSQL for storage. Unrelated trailer.";
        let decisions = heuristic_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].description.contains("PostgreSQL"));
    }

    #[test]
    fn test_heuristic_multiple_decisions() {
        let text = "We decided to use tokio. Also, let's go with sqlite for storage.";
        let decisions = heuristic_decisions(text);
        assert_eq!(decisions.len(), 2);
    }

    #[tokio::test]
    async fn test_extract_skips_non_candidates() {
        let chain = crate::summarize::SummarizerChain::new(vec![]);
        let decisions = extract_decisions(&chain, "what time is the standup?").await;
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn test_extract_heuristic_without_providers() {
        let chain = crate::summarize::SummarizerChain::new(vec![]);
        let decisions =
            extract_decisions(&chain, "We decided to use PostgreSQL for storage").await;
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].description.contains("PostgreSQL"));
    }
}
