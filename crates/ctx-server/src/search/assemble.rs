// search/assemble.rs
// Token-budgeted context assembly

use super::fusion::ScoredEntity;
use crate::db::Entity;

/// Token estimation hook. The default is the chars/4 heuristic.
pub type TokenEstimator = fn(&str) -> usize;

/// Conservative default: one token per four characters, rounded up.
pub fn default_estimator(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Output rendering for the assembled bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderFormat {
    #[default]
    Markdown,
    Xml,
    Text,
}

impl RenderFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(Self::Markdown),
            "xml" => Some(Self::Xml),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Assembly parameters.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub token_budget: usize,
    pub format: RenderFormat,
    pub estimator: TokenEstimator,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            format: RenderFormat::Markdown,
            estimator: default_estimator,
        }
    }
}

/// The assembled, budgeted context bundle.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextBundle {
    pub content: String,
    /// Entity ids included, in pack order.
    pub sources: Vec<String>,
    /// Mean fused score of included entities; 0 when nothing was included.
    pub confidence: f32,
    pub tokens_used: usize,
    /// True when the budget forced at least one ranked entity out.
    pub truncated: bool,
}

/// Greedy-pack ranked entities under the token budget.
///
/// Entities are taken strictly in rank order; packing stops at the first
/// one that does not fit, so a lower-ranked entity never displaces a
/// higher-ranked one.
pub fn assemble_context(ranked: &[ScoredEntity], opts: &AssembleOptions) -> ContextBundle {
    let mut blocks: Vec<String> = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    let mut score_sum = 0.0f32;
    let mut tokens_used = 0usize;
    let mut truncated = false;

    for item in ranked {
        let block = render_entity(&item.entity, opts.format);
        let cost = (opts.estimator)(&block);
        if tokens_used + cost > opts.token_budget {
            truncated = true;
            break;
        }
        tokens_used += cost;
        score_sum += item.score;
        sources.push(item.entity.id.clone());
        blocks.push(block);
    }

    let confidence = if sources.is_empty() {
        0.0
    } else {
        score_sum / sources.len() as f32
    };

    let content = match opts.format {
        RenderFormat::Markdown | RenderFormat::Text => blocks.join("\n\n"),
        RenderFormat::Xml => format!("<context>\n{}\n</context>", blocks.join("\n")),
    };

    ContextBundle {
        content,
        sources,
        confidence,
        tokens_used,
        truncated,
    }
}

fn location(entity: &Entity) -> Option<String> {
    let path = entity.file_path.as_deref()?;
    match (entity.start_line, entity.end_line) {
        (Some(start), Some(end)) => Some(format!("{path}:{start}-{end}")),
        _ => Some(path.to_string()),
    }
}

fn body(entity: &Entity) -> &str {
    entity
        .content
        .as_deref()
        .or(entity.summary.as_deref())
        .unwrap_or("")
}

fn render_entity(entity: &Entity, format: RenderFormat) -> String {
    match format {
        RenderFormat::Markdown => {
            let mut block = format!("## {} `{}`\n", entity.entity_type, entity.qualified_name);
            if let Some(loc) = location(entity) {
                block.push_str(&format!("_{}_\n", loc));
            }
            if let Some(summary) = entity.summary.as_deref().filter(|s| !s.is_empty()) {
                block.push_str(&format!("{}\n", summary));
            }
            if let Some(content) = entity.content.as_deref().filter(|c| !c.is_empty()) {
                block.push_str(&format!("```\n{}\n```", content));
            }
            block.trim_end().to_string()
        }
        RenderFormat::Xml => {
            let mut block = format!(
                "<entity type=\"{}\" name=\"{}\"",
                entity.entity_type, entity.qualified_name
            );
            if let Some(loc) = location(entity) {
                block.push_str(&format!(" location=\"{}\"", loc));
            }
            block.push('>');
            block.push_str(&xml_escape(body(entity)));
            block.push_str("</entity>");
            block
        }
        RenderFormat::Text => {
            let mut block = format!("{} {}", entity.entity_type, entity.qualified_name);
            if let Some(loc) = location(entity) {
                block.push_str(&format!(" ({})", loc));
            }
            let text = body(entity);
            if !text.is_empty() {
                block.push('\n');
                block.push_str(text);
            }
            block
        }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fusion::Strategy;

    fn scored(id: &str, score: f32, content: &str) -> ScoredEntity {
        ScoredEntity {
            entity: Entity {
                id: id.to_string(),
                entity_type: "function".to_string(),
                name: id.to_string(),
                qualified_name: format!("m::{id}"),
                content: Some(content.to_string()),
                summary: None,
                file_path: Some("m.ts".to_string()),
                start_line: Some(1),
                end_line: Some(3),
                content_hash: None,
                metadata: serde_json::Value::Null,
                created_at: "2026-01-01T00:00:00.000Z".to_string(),
                updated_at: "2026-01-01T00:00:00.000Z".to_string(),
            },
            score,
            strategies: vec![Strategy::Keyword],
        }
    }

    #[test]
    fn test_default_estimator_chars_over_four() {
        assert_eq!(default_estimator(""), 0);
        assert_eq!(default_estimator("abcd"), 1);
        assert_eq!(default_estimator("abcde"), 2);
        assert_eq!(default_estimator(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_empty_results() {
        let bundle = assemble_context(&[], &AssembleOptions::default());
        assert_eq!(bundle.confidence, 0.0);
        assert!(!bundle.truncated);
        assert!(bundle.sources.is_empty());
        assert_eq!(bundle.tokens_used, 0);
    }

    #[test]
    fn test_budget_truncation() {
        // Two entities that together exceed the budget
        let results = vec![
            scored("AuthService", 0.9, &"a".repeat(150)),
            scored("login", 0.7, &"b".repeat(150)),
        ];
        let opts = AssembleOptions {
            token_budget: 50,
            ..Default::default()
        };
        let bundle = assemble_context(&results, &opts);

        assert!(bundle.truncated);
        assert_eq!(bundle.sources, vec!["AuthService"]);
        assert!(bundle.tokens_used <= 50);
    }

    #[test]
    fn test_everything_fits() {
        let results = vec![scored("a", 1.0, "tiny"), scored("b", 0.5, "small")];
        let bundle = assemble_context(&results, &AssembleOptions::default());
        assert!(!bundle.truncated);
        assert_eq!(bundle.sources.len(), 2);
        assert!((bundle.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_markdown_rendering() {
        let results = vec![scored("a", 1.0, "return 1")];
        let bundle = assemble_context(&results, &AssembleOptions::default());
        assert!(bundle.content.contains("## function `m::a`"));
        assert!(bundle.content.contains("```\nreturn 1\n```"));
        assert!(bundle.content.contains("m.ts:1-3"));
    }

    #[test]
    fn test_xml_rendering_escapes() {
        let results = vec![scored("a", 1.0, "if (x < 2) {}")];
        let opts = AssembleOptions {
            format: RenderFormat::Xml,
            ..Default::default()
        };
        let bundle = assemble_context(&results, &opts);
        assert!(bundle.content.starts_with("<context>"));
        assert!(bundle.content.contains("&lt; 2"));
    }

    #[test]
    fn test_text_rendering() {
        let results = vec![scored("a", 1.0, "body text")];
        let opts = AssembleOptions {
            format: RenderFormat::Text,
            ..Default::default()
        };
        let bundle = assemble_context(&results, &opts);
        assert!(bundle.content.starts_with("function m::a"));
        assert!(bundle.content.contains("body text"));
    }

    #[test]
    fn test_custom_estimator() {
        fn one_per_entity(_: &str) -> usize {
            1
        }
        let results = vec![
            scored("a", 1.0, &"x".repeat(10_000)),
            scored("b", 0.9, &"y".repeat(10_000)),
        ];
        let opts = AssembleOptions {
            token_budget: 2,
            estimator: one_per_entity,
            ..Default::default()
        };
        let bundle = assemble_context(&results, &opts);
        assert_eq!(bundle.sources.len(), 2);
        assert!(!bundle.truncated);
    }
}
