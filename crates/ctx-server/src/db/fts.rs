// db/fts.rs
// FTS5 query construction shared by entity, message, and decision search

/// Build an FTS5 MATCH expression from user input.
///
/// Single terms get prefix matching; multiple terms are OR-ed with a prefix
/// on the last term for partial matching while typing.
pub fn build_fts_query(query: &str) -> String {
    let terms: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();

    if terms.is_empty() {
        return String::new();
    }

    if terms.len() == 1 {
        let cleaned = escape_fts_term(terms[0]);
        if cleaned.is_empty() {
            return String::new();
        }
        return format!("{}*", cleaned);
    }

    let mut query_parts: Vec<String> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        let cleaned = escape_fts_term(term);
        if cleaned.is_empty() {
            continue;
        }
        if i == terms.len() - 1 {
            query_parts.push(format!("{}*", cleaned));
        } else {
            query_parts.push(cleaned);
        }
    }

    query_parts.join(" OR ")
}

/// Strip FTS5 operator characters (" - * ( ) ^) so user input can't break
/// the MATCH expression.
pub fn escape_fts_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Convert a BM25 rank (negative, lower is better) to a score in [0, 1].
pub fn bm25_to_score(rank: f64) -> f32 {
    (((-rank + 20.0) / 20.0).clamp(0.0, 1.0)) as f32
}

/// Build LIKE patterns for the fallback scan.
pub fn like_patterns(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| format!("%{}%", t.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_fts_term() {
        assert_eq!(escape_fts_term("hello"), "hello");
        assert_eq!(escape_fts_term("fn()"), "fn");
        assert_eq!(escape_fts_term("test-case"), "testcase");
        assert_eq!(escape_fts_term("*-()^\""), "");
    }

    #[test]
    fn test_build_fts_query_single_term() {
        assert_eq!(build_fts_query("search"), "search*");
        assert_eq!(build_fts_query(""), "");
        assert_eq!(build_fts_query("() *"), "");
    }

    #[test]
    fn test_build_fts_query_multiple_terms() {
        assert_eq!(build_fts_query("find user data"), "find OR user OR data*");
    }

    #[test]
    fn test_bm25_to_score_range() {
        assert!(bm25_to_score(-20.0) >= 0.99);
        assert!((bm25_to_score(0.0) - 1.0).abs() < 0.01 || bm25_to_score(0.0) <= 1.0);
        assert!(bm25_to_score(5.0) < bm25_to_score(-5.0));
        let s = bm25_to_score(-7.3);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn test_like_patterns() {
        assert_eq!(like_patterns("Auth Login"), vec!["%auth%", "%login%"]);
    }
}
