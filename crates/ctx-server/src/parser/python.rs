// parser/python.rs
// Python grammar front-end

use super::{
    FunctionCall, Import, LanguageParser, RawParse, Symbol, default_parse, end_line, node_text,
    start_line,
};
use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn language_id(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Python language: {}", e))
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
        "function_definition" => {
            if let Some(sym) = extract_function(node, source, parent_name) {
                let func_name = sym.qualified_name.clone();
                // Top-level names without a leading underscore are the
                // module's conventional public surface.
                if sym.parent.is_none() && !sym.name.starts_with('_') {
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
        "class_definition" => {
            if let Some(sym) = extract_class(node, source, parent_name) {
                let name = sym.name.clone();
                if sym.parent.is_none() && !name.starts_with('_') {
                    raw.exports.push(name.clone());
                }
                raw.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, source, raw, Some(&name), current_function);
                    }
                }
                return;
            }
        }
        "import_statement" | "import_from_statement" => {
            if let Some(import) = extract_import(node, source) {
                raw.imports.push(import);
            }
        }
        "call" => {
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

/// First expression statement of a body when it is a string: the docstring.
fn docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let text = node_text(expr, source);
    let trimmed = text
        .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'f' || c == 'u')
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn extract_function(node: Node, source: &[u8], parent_name: Option<&str>) -> Option<Symbol> {
    let name = node
        .child_by_field_name("name")
        .map(|n| node_text(n, source))?;

    let symbol_type = if parent_name.is_some() { "method" } else { "function" };

    Some(Symbol {
        symbol_type: symbol_type.to_string(),
        name: name.clone(),
        qualified_name: qualify(parent_name, &name),
        signature: node
            .child_by_field_name("parameters")
            .map(|n| format!("def {}{}", name, node_text(n, source))),
        docstring: docstring(node, source),
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_class(node: Node, source: &[u8], parent_name: Option<&str>) -> Option<Symbol> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, source);

    Some(Symbol {
        symbol_type: "class".to_string(),
        name: name.clone(),
        qualified_name: qualify(parent_name, &name),
        signature: None,
        docstring: docstring(node, source),
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_import(node: Node, source: &[u8]) -> Option<Import> {
    let path = match node.kind() {
        "import_from_statement" => node
            .child_by_field_name("module_name")
            .map(|n| node_text(n, source))?,
        _ => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source))
            .or_else(|| {
                node.named_child(0).map(|n| node_text(n, source))
            })?,
    };

    let is_external = !path.starts_with('.');

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
        "attribute" => function_node
            .child_by_field_name("attribute")
            .map(|n| node_text(n, source))?,
        _ => return None,
    };

    // Skip common builtins
    if matches!(
        callee_name.as_str(),
        "print" | "len" | "range" | "str" | "int" | "float" | "list" | "dict" | "set"
            | "isinstance" | "super" | "type" | "format" | "append" | "get"
    ) {
        return None;
    }

    Some(FunctionCall {
        caller_name: caller.to_string(),
        callee_name,
        call_line: start_line(node),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_py(code: &str) -> RawParse {
        let py_parser = PythonParser;
        let mut parser = tree_sitter::Parser::new();
        py_parser.configure_parser(&mut parser).unwrap();
        py_parser.parse(&mut parser, code).unwrap()
    }

    #[test]
    fn test_parse_function_with_docstring() {
        let code = "def greet(name):\n    \"\"\"Say hello.\"\"\"\n    return f\"hi {name}\"\n";
        let raw = parse_py(code);
        assert_eq!(raw.symbols.len(), 1);
        let sym = &raw.symbols[0];
        assert_eq!(sym.name, "greet");
        assert_eq!(sym.docstring.as_deref(), Some("Say hello."));
        assert_eq!(sym.signature.as_deref(), Some("def greet(name)"));
        assert_eq!(raw.exports, vec!["greet"]);
    }

    #[test]
    fn test_private_function_not_exported() {
        let raw = parse_py("def _internal():\n    pass\n");
        assert_eq!(raw.symbols.len(), 1);
        assert!(raw.exports.is_empty());
    }

    #[test]
    fn test_class_methods_qualified() {
        let code = "class Store:\n    def save(self):\n        self.flush()\n";
        let raw = parse_py(code);
        let method = raw.symbols.iter().find(|s| s.name == "save").unwrap();
        assert_eq!(method.qualified_name, "Store.save");
        assert_eq!(method.symbol_type, "method");
        assert!(
            raw.calls
                .iter()
                .any(|c| c.caller_name == "Store.save" && c.callee_name == "flush")
        );
    }

    #[test]
    fn test_imports() {
        let code = "import os\nfrom .local import helper\nfrom requests import get\n";
        let raw = parse_py(code);
        assert!(raw.imports.iter().any(|i| i.path == "os" && i.is_external));
        assert!(raw.imports.iter().any(|i| i.path == ".local" && !i.is_external));
        assert!(raw.imports.iter().any(|i| i.path == "requests"));
    }
}
