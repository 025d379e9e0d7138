// summarize/template.rs
// Deterministic summary fallback when no provider is reachable

/// Build a summary from the symbol shape alone: type, name, signature, and
/// the first non-empty lines of content. Output is stable for stable input.
pub fn template_summary(
    entity_type: &str,
    name: &str,
    signature: Option<&str>,
    content: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    match signature {
        Some(sig) if !sig.is_empty() => {
            parts.push(format!("{} {} with signature {}", capitalize(entity_type), name, sig));
        }
        _ => {
            parts.push(format!("{} {}", capitalize(entity_type), name));
        }
    }

    let first_lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("//") && !l.starts_with('#'))
        .take(3)
        .collect();
    if !first_lines.is_empty() {
        parts.push(format!("Begins: {}", first_lines.join(" ")));
    }

    let mut summary = parts.join(". ");
    if summary.len() > 300 {
        summary = crate::utils::truncate(&summary, 297);
    }
    summary
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
