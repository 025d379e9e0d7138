// parser/mod.rs
// Language-agnostic parse facade over tree-sitter grammars

#[cfg(feature = "parsers")]
pub mod go;
#[cfg(feature = "parsers")]
pub mod python;
#[cfg(feature = "parsers")]
pub mod rust;
#[cfg(feature = "parsers")]
pub mod typescript;

use crate::error::{CtxError, Result};

#[cfg(feature = "parsers")]
use anyhow::anyhow;
#[cfg(feature = "parsers")]
use once_cell::sync::Lazy;
#[cfg(feature = "parsers")]
use std::collections::HashMap;

/// Extracted symbol from source code.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// function, class, interface, method, struct, enum, trait, module, type, ...
    pub symbol_type: String,
    pub name: String,
    /// Name within the file; nested symbols join their parent with `.`
    /// (e.g. `AuthService.login`).
    pub qualified_name: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    /// Qualified name of the enclosing symbol, if any. Children are kept
    /// flat; this reference reconstructs the tree.
    pub parent: Option<String>,
}

/// Extracted import statement.
#[derive(Debug, Clone)]
pub struct Import {
    pub path: String,
    pub symbols: Option<Vec<String>>,
    pub is_external: bool,
}

/// Extracted function call (for graph edges).
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub caller_name: String,
    pub callee_name: String,
    pub call_line: u32,
}

/// Normalized result of parsing one source file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub file_path: String,
    pub language: String,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub exports: Vec<String>,
    pub calls: Vec<FunctionCall>,
    /// Per-file, non-fatal extraction problems.
    pub errors: Vec<String>,
}

/// Raw per-language extraction output before file-level normalization.
#[cfg(feature = "parsers")]
#[derive(Debug, Default)]
pub struct RawParse {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub exports: Vec<String>,
    pub calls: Vec<FunctionCall>,
}

/// Parser capability consumed by the indexer. The engine ships a tree-sitter
/// implementation; embedders may substitute their own grammars.
pub trait Parser: Send + Sync {
    /// Whether this parser recognizes the file at all.
    fn supports(&self, file_path: &str) -> bool;

    /// Parse a source file into the normalized shape. Errors are per-file
    /// and never abort an indexing batch.
    fn parse(&self, file_path: &str, source: &str) -> Result<ParseResult>;
}

/// Trait implemented once per grammar.
#[cfg(feature = "parsers")]
pub trait LanguageParser: Send + Sync {
    /// Language identifier (e.g., "rust", "python")
    fn language_id(&self) -> &'static str;

    /// File extensions this parser handles
    fn extensions(&self) -> &'static [&'static str];

    /// Configure a tree-sitter parser with the appropriate grammar
    fn configure_parser(&self, parser: &mut tree_sitter::Parser) -> anyhow::Result<()>;

    /// Parse source code and extract symbols, imports, exports, and calls
    fn parse(&self, parser: &mut tree_sitter::Parser, content: &str) -> anyhow::Result<RawParse>;
}

#[cfg(feature = "parsers")]
static RUST_PARSER: rust::RustParser = rust::RustParser;
#[cfg(feature = "parsers")]
static PYTHON_PARSER: python::PythonParser = python::PythonParser;
#[cfg(feature = "parsers")]
static TYPESCRIPT_PARSER: typescript::TypeScriptParser = typescript::TypeScriptParser;
#[cfg(feature = "parsers")]
static GO_PARSER: go::GoParser = go::GoParser;

/// Registry of all available language parsers, keyed by extension.
#[cfg(feature = "parsers")]
pub static PARSERS: Lazy<HashMap<&'static str, &'static dyn LanguageParser>> = Lazy::new(|| {
    let parsers: &[&'static dyn LanguageParser] =
        &[&RUST_PARSER, &PYTHON_PARSER, &TYPESCRIPT_PARSER, &GO_PARSER];
    let mut by_extension = HashMap::new();
    for parser in parsers {
        for ext in parser.extensions() {
            by_extension.insert(*ext, *parser);
        }
    }
    by_extension
});

/// Helper to extract text from a tree-sitter node.
#[cfg(feature = "parsers")]
pub fn node_text(node: tree_sitter::Node, source: &[u8]) -> String {
    std::str::from_utf8(&source[node.byte_range()])
        .unwrap_or("")
        .to_string()
}

/// 1-indexed start line of a node.
#[cfg(feature = "parsers")]
pub fn start_line(node: tree_sitter::Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-indexed end line of a node.
#[cfg(feature = "parsers")]
pub fn end_line(node: tree_sitter::Node) -> u32 {
    node.end_position().row as u32 + 1
}

#[cfg(feature = "parsers")]
fn extension_of(file_path: &str) -> &str {
    std::path::Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

/// Built-in tree-sitter parser facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl Parser for TreeSitterParser {
    #[cfg(feature = "parsers")]
    fn supports(&self, file_path: &str) -> bool {
        PARSERS.contains_key(extension_of(file_path))
    }

    #[cfg(not(feature = "parsers"))]
    fn supports(&self, _file_path: &str) -> bool {
        false
    }

    #[cfg(feature = "parsers")]
    fn parse(&self, file_path: &str, source: &str) -> Result<ParseResult> {
        let ext = extension_of(file_path);
        let lang = PARSERS
            .get(ext)
            .ok_or_else(|| CtxError::Parse(format!("unsupported extension '{}'", ext)))?;

        let mut parser = tree_sitter::Parser::new();
        lang.configure_parser(&mut parser)
            .map_err(|e| CtxError::Parse(e.to_string()))?;
        let raw = lang
            .parse(&mut parser, source)
            .map_err(|e| CtxError::Parse(e.to_string()))?;

        Ok(ParseResult {
            file_path: file_path.to_string(),
            language: lang.language_id().to_string(),
            symbols: raw.symbols,
            imports: raw.imports,
            exports: raw.exports,
            calls: raw.calls,
            errors: Vec::new(),
        })
    }

    #[cfg(not(feature = "parsers"))]
    fn parse(&self, file_path: &str, _source: &str) -> Result<ParseResult> {
        Err(CtxError::Parse(format!(
            "no grammar available for {} (built without the parsers feature)",
            file_path
        )))
    }
}

/// Parse a tree with a grammar that is already configured, collecting via
/// the per-language walk function.
#[cfg(feature = "parsers")]
pub fn default_parse(
    parser: &mut tree_sitter::Parser,
    content: &str,
    walk: fn(tree_sitter::Node, &[u8], &mut RawParse, Option<&str>, Option<&str>),
) -> anyhow::Result<RawParse> {
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("tree-sitter returned no tree"))?;
    let mut raw = RawParse::default();
    walk(tree.root_node(), content.as_bytes(), &mut raw, None, None);
    Ok(raw)
}
