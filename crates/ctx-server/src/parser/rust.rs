// parser/rust.rs
// Rust grammar front-end

use super::{
    FunctionCall, Import, LanguageParser, RawParse, Symbol, default_parse, end_line, node_text,
    start_line,
};
use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

pub struct RustParser;

impl LanguageParser for RustParser {
    fn language_id(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Rust language: {}", e))
    }

    fn parse(&self, parser: &mut Parser, content: &str) -> Result<RawParse> {
        default_parse(parser, content, walk)
    }
}

fn walk(
    node: Node,
    source: &[u8],
    raw: &mut RawParse,
    parent_name: Option<&str>,
    current_function: Option<&str>,
) {
    match node.kind() {
        "function_item" | "function_signature_item" => {
            if let Some(sym) = extract_function(node, source, parent_name) {
                let func_name = sym.qualified_name.clone();
                if is_public(node, source) && sym.parent.is_none() {
                    raw.exports.push(sym.name.clone());
                }
                raw.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, source, raw, parent_name, Some(&func_name));
                    }
                }
                return;
            }
        }
        "struct_item" | "enum_item" | "trait_item" | "mod_item" | "type_item" => {
            let symbol_type = match node.kind() {
                "struct_item" => "struct",
                "enum_item" => "enum",
                "trait_item" => "trait",
                "mod_item" => "module",
                _ => "type",
            };
            if let Some(sym) = extract_named(node, source, symbol_type, parent_name) {
                let name = sym.name.clone();
                if is_public(node, source) {
                    raw.exports.push(name.clone());
                }
                raw.symbols.push(sym);
                if node.kind() == "trait_item" {
                    for child in node.children(&mut node.walk()) {
                        walk(child, source, raw, Some(&name), current_function);
                    }
                    return;
                }
            }
        }
        "impl_item" => {
            let type_name = node
                .child_by_field_name("type")
                .map(|n| node_text(n, source));
            for child in node.children(&mut node.walk()) {
                walk(child, source, raw, type_name.as_deref(), current_function);
            }
            return;
        }
        "use_declaration" => {
            if let Some(import) = extract_use(node, source) {
                raw.imports.push(import);
            }
        }
        "call_expression" => {
            if let Some(caller) = current_function
                && let Some(call) = extract_call(node, source, caller)
            {
                raw.calls.push(call);
            }
        }
        _ => {}
    }

    for child in node.children(&mut node.walk()) {
        walk(child, source, raw, parent_name, current_function);
    }
}

fn qualify(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(p) => format!("{}.{}", p, name),
        None => name.to_string(),
    }
}

fn is_public(node: Node, source: &[u8]) -> bool {
    node.children(&mut node.walk())
        .any(|c| c.kind() == "visibility_modifier" && node_text(c, source).starts_with("pub"))
}

/// Doc comment from the `///` lines immediately preceding a node.
fn doc_comment(node: Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if sibling.kind() != "line_comment" {
            break;
        }
        let text = node_text(sibling, source);
        let Some(stripped) = text.strip_prefix("///") else {
            break;
        };
        lines.push(stripped.trim().to_string());
        current = sibling.prev_sibling();
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn extract_function(node: Node, source: &[u8], parent_name: Option<&str>) -> Option<Symbol> {
    let name = node
        .child_by_field_name("name")
        .map(|n| node_text(n, source))?;

    let params = node
        .child_by_field_name("parameters")
        .map(|n| node_text(n, source));
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| node_text(n, source));
    let signature = match (params, return_type) {
        (Some(p), Some(r)) => Some(format!("fn {}{} -> {}", name, p, r)),
        (Some(p), None) => Some(format!("fn {}{}", name, p)),
        _ => None,
    };

    let symbol_type = if parent_name.is_some() { "method" } else { "function" };

    Some(Symbol {
        symbol_type: symbol_type.to_string(),
        name: name.clone(),
        qualified_name: qualify(parent_name, &name),
        signature,
        docstring: doc_comment(node, source),
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_named(
    node: Node,
    source: &[u8],
    symbol_type: &str,
    parent_name: Option<&str>,
) -> Option<Symbol> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, source);

    Some(Symbol {
        symbol_type: symbol_type.to_string(),
        name: name.clone(),
        qualified_name: qualify(parent_name, &name),
        signature: None,
        docstring: doc_comment(node, source),
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_use(node: Node, source: &[u8]) -> Option<Import> {
    let arg = node.child_by_field_name("argument")?;
    let path = node_text(arg, source);

    let is_external =
        !path.starts_with("crate::") && !path.starts_with("self::") && !path.starts_with("super::");

    Some(Import {
        path,
        symbols: None,
        is_external,
    })
}

fn extract_call(node: Node, source: &[u8], caller: &str) -> Option<FunctionCall> {
    let function_node = node.child_by_field_name("function")?;
    let callee_name = match function_node.kind() {
        "identifier" => node_text(function_node, source),
        "field_expression" => function_node
            .child_by_field_name("field")
            .map(|n| node_text(n, source))?,
        "scoped_identifier" => function_node
            .child_by_field_name("name")
            .map(|n| node_text(n, source))?,
        _ => return None,
    };

    Some(FunctionCall {
        caller_name: caller.to_string(),
        callee_name,
        call_line: start_line(node),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_rs(code: &str) -> RawParse {
        let rust_parser = RustParser;
        let mut parser = tree_sitter::Parser::new();
        rust_parser.configure_parser(&mut parser).unwrap();
        rust_parser.parse(&mut parser, code).unwrap()
    }

    #[test]
    fn test_parse_function_with_signature() {
        let raw = parse_rs("pub fn add(a: i32, b: i32) -> i32 { a + b }\n");
        assert_eq!(raw.symbols.len(), 1);
        let sym = &raw.symbols[0];
        assert_eq!(sym.name, "add");
        assert_eq!(sym.symbol_type, "function");
        assert_eq!(sym.signature.as_deref(), Some("fn add(a: i32, b: i32) -> i32"));
        assert_eq!(raw.exports, vec!["add"]);
    }

    #[test]
    fn test_private_function_not_exported() {
        let raw = parse_rs("fn internal() {}\n");
        assert_eq!(raw.symbols.len(), 1);
        assert!(raw.exports.is_empty());
    }

    #[test]
    fn test_impl_methods_qualified() {
        let code = r#"
struct Engine;

impl Engine {
    pub fn start(&self) {
        self.spin_up();
    }
}
"#;
        let raw = parse_rs(code);
        let method = raw.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(method.symbol_type, "method");
        assert_eq!(method.qualified_name, "Engine.start");
        assert_eq!(method.parent.as_deref(), Some("Engine"));
        assert!(
            raw.calls
                .iter()
                .any(|c| c.caller_name == "Engine.start" && c.callee_name == "spin_up")
        );
    }

    #[test]
    fn test_doc_comment_captured() {
        let code = "/// Adds numbers.\n/// Carefully.\npub fn add() {}\n";
        let raw = parse_rs(code);
        assert_eq!(
            raw.symbols[0].docstring.as_deref(),
            Some("Adds numbers.\nCarefully.")
        );
    }

    #[test]
    fn test_use_declarations() {
        let code = "use std::collections::HashMap;\nuse crate::db::pool;\n";
        let raw = parse_rs(code);
        assert_eq!(raw.imports.len(), 2);
        assert!(raw.imports.iter().any(|i| i.path.starts_with("std") && i.is_external));
        assert!(raw.imports.iter().any(|i| i.path.starts_with("crate") && !i.is_external));
    }

    #[test]
    fn test_struct_enum_trait() {
        let code = "pub struct A;\nenum B { X }\npub trait C { fn m(&self); }\n";
        let raw = parse_rs(code);
        assert!(raw.symbols.iter().any(|s| s.name == "A" && s.symbol_type == "struct"));
        assert!(raw.symbols.iter().any(|s| s.name == "B" && s.symbol_type == "enum"));
        assert!(raw.symbols.iter().any(|s| s.name == "C" && s.symbol_type == "trait"));
        // Trait methods are flattened with a parent reference
        let m = raw.symbols.iter().find(|s| s.name == "m").unwrap();
        assert_eq!(m.parent.as_deref(), Some("C"));
    }
}
