// search/decompose.rs
// Query decomposition into weighted sub-queries

/// A sub-query with its merge weight.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub text: String,
    pub weight: f32,
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "for", "to", "of", "in", "on",
    "at", "by", "with", "how", "what", "where", "when", "why", "is", "are", "was", "were", "do",
    "does", "did", "can", "could", "should", "would", "it", "its", "this", "that", "as", "well",
    "me", "my", "our", "we", "i", "you",
];

/// Split a query into weighted sub-queries.
///
/// Boundaries: `;`, `?` between sentences, and the conjunctions
/// `and` / `as well as` / `then` when both sides carry distinct noun
/// phrases. Conjunction parts keep weight 1.0; `then` chains decay
/// geometrically (1.0, 0.8, 0.64, ...). A query with no boundaries comes
/// back unchanged with weight 1.0.
pub fn decompose_query(query: &str) -> Vec<SubQuery> {
    let mut parts: Vec<SubQuery> = Vec::new();

    for hard_part in split_hard_boundaries(query) {
        for sub in split_conjunctions(&hard_part) {
            if !sub.text.trim().is_empty() {
                parts.push(sub);
            }
        }
    }

    if parts.is_empty() {
        return vec![SubQuery {
            text: query.trim().to_string(),
            weight: 1.0,
        }];
    }
    parts
}

/// Split on `;` and on `?` that ends a sentence (more text follows).
fn split_hard_boundaries(query: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = query.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            ';' => {
                push_part(&mut parts, &mut current);
            }
            '?' => {
                // a trailing '?' is part of the final sentence, not a split
                let has_more = chars[i + 1..].iter().any(|c| c.is_alphanumeric());
                if has_more {
                    push_part(&mut parts, &mut current);
                } else {
                    current.push(c);
                }
            }
            _ => current.push(c),
        }
    }
    push_part(&mut parts, &mut current);
    parts
}

fn push_part(parts: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    current.clear();
}

/// Split one clause on conjunctions when both sides carry distinct noun
/// phrases; otherwise the clause stays whole.
fn split_conjunctions(clause: &str) -> Vec<SubQuery> {
    // `as well as` first so its `as` tokens don't confuse the others
    for (separator, sequential) in [(" as well as ", false), (" and ", false), (" then ", true)] {
        let lower = clause.to_lowercase();
        if let Some(pos) = lower.find(separator) {
            let left = clause[..pos].trim();
            let right = clause[pos + separator.len()..].trim();
            if has_distinct_noun_phrases(left, right) {
                let mut out = Vec::new();
                // Each side may split further
                let left_parts = split_conjunctions(left);
                let right_parts = split_conjunctions(right);
                let decay = if sequential { 0.8 } else { 1.0 };
                for part in left_parts {
                    out.push(part);
                }
                for part in right_parts {
                    out.push(SubQuery {
                        text: part.text,
                        weight: part.weight * decay,
                    });
                }
                return out;
            }
        }
    }
    vec![SubQuery {
        text: clause.trim().to_string(),
        weight: 1.0,
    }]
}

fn noun_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Both sides must look like noun phrases (at least two content words, so
/// bare verbs like "read and write" stay whole), and neither side's token
/// set may swallow the other (e.g. "auth and more auth" stays whole).
fn has_distinct_noun_phrases(left: &str, right: &str) -> bool {
    let left_tokens = noun_tokens(left);
    let right_tokens = noun_tokens(right);
    if left_tokens.len() < 2 || right_tokens.len() < 2 {
        return false;
    }
    left_tokens.iter().any(|t| !right_tokens.contains(t))
        && right_tokens.iter().any(|t| !left_tokens.contains(t))
}
