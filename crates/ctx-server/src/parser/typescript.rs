// parser/typescript.rs
// TypeScript/JavaScript grammar front-end

use super::{
    FunctionCall, Import, LanguageParser, RawParse, Symbol, default_parse, end_line, node_text,
    start_line,
};
use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

/// TypeScript/JavaScript parser. The TypeScript grammar is a superset of
/// JavaScript, so .js/.jsx files go through the same walk.
pub struct TypeScriptParser;

impl LanguageParser for TypeScriptParser {
    fn language_id(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .map_err(|e| anyhow!("Failed to set TypeScript language: {}", e))
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
        "function_declaration" | "method_definition" => {
            if let Some(sym) = extract_function(node, source, parent_name) {
                let func_name = sym.qualified_name.clone();
                raw.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, source, raw, parent_name, Some(&func_name));
                    }
                }
                return;
            }
        }
        "class_declaration" => {
            if let Some(sym) = extract_named(node, source, "class", parent_name) {
                let name = sym.name.clone();
                raw.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, source, raw, Some(&name), current_function);
                    }
                }
                return;
            }
        }
        "interface_declaration" => {
            if let Some(sym) = extract_named(node, source, "interface", parent_name) {
                raw.symbols.push(sym);
            }
        }
        "type_alias_declaration" => {
            if let Some(sym) = extract_named(node, source, "type", parent_name) {
                raw.symbols.push(sym);
            }
        }
        "enum_declaration" => {
            if let Some(sym) = extract_named(node, source, "enum", parent_name) {
                raw.symbols.push(sym);
            }
        }
        "import_statement" => {
            if let Some(import) = extract_import(node, source) {
                raw.imports.push(import);
            }
        }
        "export_statement" => {
            // Names introduced by the exported declaration surface as exports
            let before = raw.symbols.len();
            for child in node.children(&mut node.walk()) {
                walk(child, source, raw, parent_name, current_function);
            }
            for sym in &raw.symbols[before..] {
                if sym.parent.is_none() {
                    raw.exports.push(sym.name.clone());
                }
            }
            return;
        }
        "call_expression" => {
            if let Some(caller) = current_function
                && let Some(call) = extract_call(node, source, caller)
            {
                raw.calls.push(call);
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            // const foo = () => {} and friends
            let mut handled_function = false;
            for declarator in node.children(&mut node.walk()) {
                if declarator.kind() == "variable_declarator"
                    && let Some(value) = declarator.child_by_field_name("value")
                    && matches!(value.kind(), "arrow_function" | "function_expression" | "function")
                    && let Some(name_node) = declarator.child_by_field_name("name")
                {
                    let name = node_text(name_node, source);
                    raw.symbols.push(Symbol {
                        symbol_type: "function".to_string(),
                        name: name.clone(),
                        qualified_name: qualify(parent_name, &name),
                        signature: value
                            .child_by_field_name("parameters")
                            .map(|n| node_text(n, source)),
                        docstring: None,
                        start_line: start_line(declarator),
                        end_line: end_line(declarator),
                        parent: parent_name.map(|p| p.to_string()),
                    });
                    if let Some(body) = value.child_by_field_name("body") {
                        let qualified = qualify(parent_name, &name);
                        for child in body.children(&mut body.walk()) {
                            walk(child, source, raw, parent_name, Some(&qualified));
                        }
                    }
                    handled_function = true;
                }
            }
            if handled_function {
                return;
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
            .map(|n| node_text(n, source)),
        docstring: None,
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
        docstring: None,
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_import(node: Node, source: &[u8]) -> Option<Import> {
    let source_node = node.child_by_field_name("source")?;
    let path = node_text(source_node, source);
    let path = path.trim_matches(|c| c == '"' || c == '\'').to_string();

    let is_external = !path.starts_with('.') && !path.starts_with('/');

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
        "member_expression" => function_node
            .child_by_field_name("property")
            .map(|n| node_text(n, source))?,
        _ => return None,
    };

    // Skip common builtins
    if matches!(
        callee_name.as_str(),
        "console"
            | "log"
            | "error"
            | "warn"
            | "info"
            | "setTimeout"
            | "setInterval"
            | "clearTimeout"
            | "clearInterval"
            | "parseInt"
            | "parseFloat"
            | "JSON"
            | "Object"
            | "Array"
            | "String"
            | "require"
            | "import"
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

    fn parse_ts(code: &str) -> RawParse {
        let ts_parser = TypeScriptParser;
        let mut parser = tree_sitter::Parser::new();
        ts_parser.configure_parser(&mut parser).unwrap();
        ts_parser.parse(&mut parser, code).unwrap()
    }

    #[test]
    fn test_parse_function() {
        let raw = parse_ts("function helloWorld() {\n  return 1;\n}\n");
        assert_eq!(raw.symbols.len(), 1);
        assert_eq!(raw.symbols[0].name, "helloWorld");
        assert_eq!(raw.symbols[0].symbol_type, "function");
        assert_eq!(raw.symbols[0].start_line, 1);
        assert_eq!(raw.symbols[0].end_line, 3);
    }

    #[test]
    fn test_parse_exported_function() {
        let raw = parse_ts("export function hello(){return 1}");
        assert_eq!(raw.symbols.len(), 1);
        assert_eq!(raw.symbols[0].name, "hello");
        assert_eq!(raw.exports, vec!["hello"]);
    }

    #[test]
    fn test_parse_class_with_methods() {
        let code = r#"
export class AuthService {
    login(user: string): boolean {
        return validate(user);
    }
}
"#;
        let raw = parse_ts(code);
        let class_sym = raw.symbols.iter().find(|s| s.name == "AuthService").unwrap();
        assert_eq!(class_sym.symbol_type, "class");

        let method = raw.symbols.iter().find(|s| s.name == "login").unwrap();
        assert_eq!(method.symbol_type, "method");
        assert_eq!(method.qualified_name, "AuthService.login");
        assert_eq!(method.parent.as_deref(), Some("AuthService"));

        // Call from inside the method body is captured
        assert!(
            raw.calls
                .iter()
                .any(|c| c.caller_name == "AuthService.login" && c.callee_name == "validate")
        );
    }

    #[test]
    fn test_parse_interface_and_type() {
        let code = "interface User { id: number }\ntype Status = 'a' | 'b';\n";
        let raw = parse_ts(code);
        assert!(raw.symbols.iter().any(|s| s.name == "User" && s.symbol_type == "interface"));
        assert!(raw.symbols.iter().any(|s| s.name == "Status" && s.symbol_type == "type"));
    }

    #[test]
    fn test_parse_imports() {
        let code = "import { Component } from 'react';\nimport local from './local';\n";
        let raw = parse_ts(code);
        assert_eq!(raw.imports.len(), 2);
        assert!(raw.imports.iter().any(|i| i.path == "react" && i.is_external));
        assert!(raw.imports.iter().any(|i| i.path == "./local" && !i.is_external));
    }

    #[test]
    fn test_parse_arrow_function_const() {
        let code = "const add = (a: number, b: number) => a + b;\n";
        let raw = parse_ts(code);
        assert!(raw.symbols.iter().any(|s| s.name == "add" && s.symbol_type == "function"));
    }

    #[test]
    fn test_builtin_calls_skipped() {
        let code = "function f() { console.log('x'); helper(); }\n";
        let raw = parse_ts(code);
        assert!(raw.calls.iter().any(|c| c.callee_name == "helper"));
        assert!(!raw.calls.iter().any(|c| c.callee_name == "log"));
    }
}
