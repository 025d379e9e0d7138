// parser/go.rs
// Go grammar front-end

use super::{
    FunctionCall, Import, LanguageParser, RawParse, Symbol, default_parse, end_line, node_text,
    start_line,
};
use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

pub struct GoParser;

impl LanguageParser for GoParser {
    fn language_id(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Go language: {}", e))
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
        "function_declaration" => {
            if let Some(sym) = extract_function(node, source, None) {
                let func_name = sym.qualified_name.clone();
                // Capitalized top-level names are Go's export convention
                if sym.name.chars().next().is_some_and(|c| c.is_uppercase()) {
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
        "method_declaration" => {
            let receiver = receiver_type(node, source);
            if let Some(sym) = extract_function(node, source, receiver.as_deref()) {
                let func_name = sym.qualified_name.clone();
                raw.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, source, raw, receiver.as_deref(), Some(&func_name));
                    }
                }
                return;
            }
        }
        "type_declaration" => {
            for spec in node.children(&mut node.walk()) {
                if spec.kind() == "type_spec"
                    && let Some(name_node) = spec.child_by_field_name("name")
                {
                    let name = node_text(name_node, source);
                    let symbol_type = spec
                        .child_by_field_name("type")
                        .map(|t| match t.kind() {
                            "struct_type" => "struct",
                            "interface_type" => "interface",
                            _ => "type",
                        })
                        .unwrap_or("type");
                    if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                        raw.exports.push(name.clone());
                    }
                    raw.symbols.push(Symbol {
                        symbol_type: symbol_type.to_string(),
                        name: name.clone(),
                        qualified_name: name,
                        signature: None,
                        docstring: None,
                        start_line: start_line(spec),
                        end_line: end_line(spec),
                        parent: None,
                    });
                }
            }
        }
        "import_declaration" => {
            for child in node.children(&mut node.walk()) {
                collect_import_specs(child, source, raw);
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

fn collect_import_specs(node: Node, source: &[u8], raw: &mut RawParse) {
    match node.kind() {
        "import_spec" => {
            if let Some(path_node) = node.child_by_field_name("path") {
                let path = node_text(path_node, source)
                    .trim_matches('"')
                    .to_string();
                raw.imports.push(Import {
                    // Stdlib and module paths are all "external" to the file
                    is_external: !path.starts_with("./"),
                    path,
                    symbols: None,
                });
            }
        }
        "import_spec_list" => {
            for child in node.children(&mut node.walk()) {
                collect_import_specs(child, source, raw);
            }
        }
        _ => {}
    }
}

fn receiver_type(node: Node, source: &[u8]) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    for child in receiver.children(&mut receiver.walk()) {
        if child.kind() == "parameter_declaration"
            && let Some(type_node) = child.child_by_field_name("type")
        {
            let text = node_text(type_node, source);
            return Some(text.trim_start_matches('*').to_string());
        }
    }
    None
}

fn extract_function(node: Node, source: &[u8], parent_name: Option<&str>) -> Option<Symbol> {
    let name = node
        .child_by_field_name("name")
        .map(|n| node_text(n, source))?;

    let qualified_name = match parent_name {
        Some(p) => format!("{}.{}", p, name),
        None => name.clone(),
    };
    let symbol_type = if parent_name.is_some() { "method" } else { "function" };

    Some(Symbol {
        symbol_type: symbol_type.to_string(),
        name,
        qualified_name,
        signature: node
            .child_by_field_name("parameters")
            .map(|n| node_text(n, source)),
        docstring: None,
        start_line: start_line(node),
        end_line: end_line(node),
        parent: parent_name.map(|p| p.to_string()),
    })
}

fn extract_call(node: Node, source: &[u8], caller: &str) -> Option<FunctionCall> {
    let function_node = node.child_by_field_name("function")?;
    let callee_name = match function_node.kind() {
        "identifier" => node_text(function_node, source),
        "selector_expression" => function_node
            .child_by_field_name("field")
            .map(|n| node_text(n, source))?,
        _ => return None,
    };

    // Skip common builtins
    if matches!(
        callee_name.as_str(),
        "len" | "cap" | "make" | "new" | "append" | "copy" | "delete" | "panic" | "recover"
            | "print" | "println" | "Printf" | "Println" | "Sprintf" | "Errorf"
    ) {
        return None;
    }

    Some(FunctionCall {
        caller_name: caller.to_string(),
        callee_name,
        call_line: start_line(node),
    })
}
