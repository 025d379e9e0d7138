// crates/ctx-server/src/utils.rs
// Shared utility functions used across the codebase

use std::fmt::Display;
use std::path::Path;

/// Extension trait for Result to simplify error conversion to String.
pub trait ResultExt<T, E> {
    /// Convert the error type to String.
    fn str_err(self) -> Result<T, String>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn str_err(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Truncate a string to max length with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Truncate content to a line budget, appending a marker when cut.
pub fn truncate_lines(content: &str, max_lines: usize) -> String {
    let mut lines = content.lines();
    let kept: Vec<&str> = lines.by_ref().take(max_lines).collect();
    if lines.next().is_none() {
        content.to_string()
    } else {
        let mut out = kept.join("\n");
        out.push_str("\n// ... (truncated)");
        out
    }
}

/// SHA-256 hex digest of content, used for incremental-skip hashing.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn test_truncate_lines_under_limit() {
        let content = "a\nb\nc";
        assert_eq!(truncate_lines(content, 5), content);
    }

    #[test]
    fn test_truncate_lines_at_limit() {
        let content = "a\nb\nc";
        assert_eq!(truncate_lines(content, 3), content);
    }

    #[test]
    fn test_truncate_lines_over_limit() {
        let content = "a\nb\nc\nd";
        let out = truncate_lines(content, 2);
        assert_eq!(out, "a\nb\n// ... (truncated)");
    }

    #[test]
    fn test_content_hash_stable_and_distinct() {
        let a = content_hash("fn main() {}");
        let b = content_hash("fn main() {}");
        let c = content_hash("fn main() { }");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
