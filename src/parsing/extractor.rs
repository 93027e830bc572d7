//! Line-oriented symbol extraction.
//!
//! A ctags-style extractor: each language has an ordered list of line
//! patterns, and the first pattern that matches a line wins. Parent
//! information comes from indentation, which holds for formatted code in
//! every supported language.

use regex::Regex;
use std::collections::HashMap;

use super::Language;
use crate::error::IndexResult;
use crate::types::{ParseRequest, Symbol};

/// Longest signature stored per symbol, in bytes.
const MAX_SIGNATURE_LEN: usize = 256;

/// Turns one file into symbols. Runs on blocking threads.
pub trait SymbolExtractor: Send + Sync {
    fn extract(&self, request: &ParseRequest) -> IndexResult<Vec<Symbol>>;
}

struct Rule {
    regex: Regex,
    kind: &'static str,
    /// Later, more indented lines belong to this symbol.
    container: bool,
    /// Record a row for the match itself.
    emit: bool,
    /// Only applies inside a container (class methods without a keyword).
    nested_only: bool,
}

struct RuleSpec {
    pattern: &'static str,
    kind: &'static str,
    container: bool,
    emit: bool,
    nested_only: bool,
}

const fn rule(pattern: &'static str, kind: &'static str) -> RuleSpec {
    RuleSpec {
        pattern,
        kind,
        container: false,
        emit: true,
        nested_only: false,
    }
}

const fn container(pattern: &'static str, kind: &'static str) -> RuleSpec {
    RuleSpec {
        pattern,
        kind,
        container: true,
        emit: true,
        nested_only: false,
    }
}

const fn nested(pattern: &'static str, kind: &'static str) -> RuleSpec {
    RuleSpec {
        pattern,
        kind,
        container: false,
        emit: true,
        nested_only: true,
    }
}

fn rust_rules() -> Vec<RuleSpec> {
    vec![
        rule(
            r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*fn\s+(?P<name>\w+)"#,
            "function",
        ),
        rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>\w+)", "struct"),
        rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>\w+)", "enum"),
        rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?union\s+(?P<name>\w+)", "union"),
        container(
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>\w+)",
            "trait",
        ),
        RuleSpec {
            emit: false,
            ..container(
                r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[\w:]+(?:<[^>]*>)?\s+for\s+)?(?:[\w]+::)*(?P<name>\w+)",
                "impl",
            )
        },
        container(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>\w+)", "module"),
        rule(
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?(?P<name>\w+)\s*:",
            "constant",
        ),
        rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>\w+)", "type"),
        rule(r"^\s*macro_rules!\s*(?P<name>\w+)", "macro"),
    ]
}

fn go_rules() -> Vec<RuleSpec> {
    vec![
        rule(
            r"^func\s*\(\s*(?:\w+\s+)?\*?(?P<parent>\w+)(?:\[[^\]]*\])?\s*\)\s*(?P<name>\w+)",
            "method",
        ),
        rule(r"^func\s+(?P<name>\w+)", "function"),
        rule(r"^type\s+(?P<name>\w+)(?:\[[^\]]*\])?\s+struct\b", "struct"),
        rule(r"^type\s+(?P<name>\w+)(?:\[[^\]]*\])?\s+interface\b", "interface"),
        rule(r"^type\s+(?P<name>\w+)", "type"),
        rule(r"^(?:const|var)\s+(?P<name>\w+)", "variable"),
    ]
}

fn python_rules() -> Vec<RuleSpec> {
    vec![
        container(r"^\s*class\s+(?P<name>\w+)", "class"),
        rule(r"^\s*(?:async\s+)?def\s+(?P<name>\w+)", "function"),
    ]
}

fn script_rules(typescript: bool) -> Vec<RuleSpec> {
    let mut rules = vec![
        container(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>\w+)",
            "class",
        ),
        rule(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>\w+)",
            "function",
        ),
        rule(
            r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::[^=]+)?=>",
            "function",
        ),
    ];
    if typescript {
        rules.push(container(
            r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(?P<name>\w+)",
            "interface",
        ));
        rules.push(rule(
            r"^\s*(?:export\s+)?(?:declare\s+)?type\s+(?P<name>\w+)\s*(?:<[^>]*>)?\s*=",
            "type",
        ));
        rules.push(rule(
            r"^\s*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+(?P<name>\w+)",
            "enum",
        ));
    }
    rules.push(nested(
        r"^\s+(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*\*?(?P<name>\w+)\s*(?:<[^>]*>)?\([^)]*\)\s*(?::\s*[^{]+)?\{",
        "method",
    ));
    rules
}

fn java_rules() -> Vec<RuleSpec> {
    vec![
        container(
            r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed|strictfp)\s+)*class\s+(?P<name>\w+)",
            "class",
        ),
        container(
            r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed|strictfp)\s+)*@?interface\s+(?P<name>\w+)",
            "interface",
        ),
        container(
            r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed|strictfp)\s+)*enum\s+(?P<name>\w+)",
            "enum",
        ),
        container(
            r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed|strictfp)\s+)*record\s+(?P<name>\w+)",
            "record",
        ),
        nested(
            r"^\s+(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]*>\s*)?[\w<>\[\],.?]+(?:\s*<[^>]*>)?\s+(?P<name>\w+)\s*\([^;]*$",
            "method",
        ),
    ]
}

fn c_family_rules(cpp: bool) -> Vec<RuleSpec> {
    let mut rules = vec![
        rule(r"^\s*#\s*define\s+(?P<name>\w+)", "macro"),
        rule(
            r"^\s*(?:typedef\s+)?struct\s+(?P<name>\w+)\s*(?::[^{;]*)?\{?\s*$",
            "struct",
        ),
        rule(r"^\s*(?:typedef\s+)?union\s+(?P<name>\w+)\s*\{?\s*$", "union"),
        rule(
            r"^\s*(?:typedef\s+)?enum\s+(?:class\s+)?(?P<name>\w+)\s*(?::[^{;]*)?\{?\s*$",
            "enum",
        ),
    ];
    if cpp {
        rules.push(container(r"^\s*namespace\s+(?P<name>\w+)", "namespace"));
        rules.push(container(
            r"^\s*(?:template\s*<[^>]*>\s*)?class\s+(?P<name>\w+)[^;]*$",
            "class",
        ));
    }
    rules.push(rule(
        r"^(?:[\w:*&<>,]+\s+)+[*&]*(?P<name>[A-Za-z_][\w:~]*)\s*\([^;]*$",
        "function",
    ));
    rules
}

fn rule_specs(language: Language) -> Vec<RuleSpec> {
    match language {
        Language::Rust => rust_rules(),
        Language::Go => go_rules(),
        Language::Python => python_rules(),
        Language::JavaScript => script_rules(false),
        Language::TypeScript => script_rules(true),
        Language::Java => java_rules(),
        Language::C => c_family_rules(false),
        Language::Cpp => c_family_rules(true),
    }
}

/// Control-flow words that look like calls or declarations to the patterns above.
const KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "catch", "return", "do", "try", "new", "throw",
    "case", "sizeof", "typeof", "delete", "await", "yield", "function", "synchronized",
];

/// Kinds whose nested functions are methods.
const TYPE_CONTAINERS: &[&str] = &[
    "class",
    "struct",
    "impl",
    "trait",
    "interface",
    "enum",
    "record",
];

/// Regex-driven [`SymbolExtractor`] for the languages in [`Language`].
///
/// Files in any other language produce no symbols.
pub struct RegexExtractor {
    rules: HashMap<Language, Vec<Rule>>,
}

impl RegexExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let mut rules = HashMap::new();
        for language in Language::ALL {
            let compiled = rule_specs(language)
                .into_iter()
                .map(|spec| {
                    Ok(Rule {
                        regex: Regex::new(spec.pattern)?,
                        kind: spec.kind,
                        container: spec.container,
                        emit: spec.emit,
                        nested_only: spec.nested_only,
                    })
                })
                .collect::<Result<Vec<_>, regex::Error>>()?;
            rules.insert(language, compiled);
        }
        Ok(Self { rules })
    }

    pub fn extract_source(&self, path: &str, source: &str) -> Vec<Symbol> {
        let Some(language) = Language::from_path(path) else {
            return Vec::new();
        };
        let Some(rules) = self.rules.get(&language) else {
            return Vec::new();
        };

        let mut symbols = Vec::new();
        // (indent, name, kind) of the enclosing containers
        let mut scopes: Vec<(usize, String, &'static str)> = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(language, trimmed) {
                continue;
            }

            let indent = line.len() - line.trim_start().len();
            while scopes.last().is_some_and(|(depth, _, _)| *depth >= indent) {
                scopes.pop();
            }

            for rule in rules {
                if rule.nested_only && scopes.is_empty() {
                    continue;
                }
                let Some(captures) = rule.regex.captures(line) else {
                    continue;
                };
                let Some(name) = captures.name("name").map(|m| m.as_str()) else {
                    continue;
                };
                if KEYWORDS.contains(&name) {
                    continue;
                }

                if rule.emit {
                    let mut kind = rule.kind;
                    let parent = match captures.name("parent") {
                        Some(receiver) => Some((receiver.as_str().to_string(), "type")),
                        None => scopes
                            .last()
                            .map(|(_, parent, parent_kind)| (parent.clone(), *parent_kind)),
                    };
                    if kind == "function"
                        && parent
                            .as_ref()
                            .is_some_and(|(_, pk)| TYPE_CONTAINERS.contains(pk))
                    {
                        kind = "method";
                    }

                    let mut symbol = Symbol::new(
                        name,
                        path,
                        (index + 1) as u32,
                        kind,
                        language.as_str(),
                    )
                    .with_signature(signature(trimmed));
                    if let Some((parent, parent_kind)) = parent {
                        symbol = symbol.with_parent(parent, parent_kind);
                    }
                    symbols.push(symbol);
                }

                if rule.container {
                    scopes.push((indent, name.to_string(), rule.kind));
                }
                break;
            }
        }

        symbols
    }
}

impl SymbolExtractor for RegexExtractor {
    fn extract(&self, request: &ParseRequest) -> IndexResult<Vec<Symbol>> {
        let source = String::from_utf8_lossy(&request.data);
        Ok(self.extract_source(&request.path, &source))
    }
}

fn is_comment(language: Language, trimmed: &str) -> bool {
    match language {
        Language::Python => trimmed.starts_with('#'),
        _ => trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*'),
    }
}

fn signature(trimmed: &str) -> String {
    let line = trimmed.trim_end_matches(['{', ':', ' ']);
    if line.len() <= MAX_SIGNATURE_LEN {
        return line.to_string();
    }
    let mut end = MAX_SIGNATURE_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str, source: &str) -> Vec<(String, String, Option<String>)> {
        RegexExtractor::new()
            .unwrap()
            .extract_source(path, source)
            .into_iter()
            .map(|s| (s.name, s.kind, s.parent))
            .collect()
    }

    fn row(name: &str, kind: &str, parent: Option<&str>) -> (String, String, Option<String>) {
        (name.to_string(), kind.to_string(), parent.map(str::to_string))
    }

    #[test]
    fn test_rust_symbols() {
        let source = r#"
// fn commented_out() {}
pub struct Config {
    name: String,
}

impl Config {
    pub fn new() -> Self {
        todo!()
    }
}

pub trait Store {
    fn get(&self);
}

pub(crate) async fn run() {}
const LIMIT: usize = 3;
macro_rules! hello { () => {} }
"#;
        assert_eq!(
            extract("src/lib.rs", source),
            vec![
                row("Config", "struct", None),
                row("new", "method", Some("Config")),
                row("Store", "trait", None),
                row("get", "method", Some("Store")),
                row("run", "function", None),
                row("LIMIT", "constant", None),
                row("hello", "macro", None),
            ]
        );
    }

    #[test]
    fn test_go_receiver_is_parent() {
        let source = "package x\n\ntype Server struct {\n}\n\nfunc (s *Server) Start() error {\n}\n\nfunc main() {\n}\n";
        assert_eq!(
            extract("cmd/main.go", source),
            vec![
                row("Server", "struct", None),
                row("Start", "method", Some("Server")),
                row("main", "function", None),
            ]
        );
    }

    #[test]
    fn test_python_nesting() {
        let source = "class Greeter:\n    def hello(self):\n        pass\n\n# def hidden():\ndef top():\n    pass\n";
        assert_eq!(
            extract("app.py", source),
            vec![
                row("Greeter", "class", None),
                row("hello", "method", Some("Greeter")),
                row("top", "function", None),
            ]
        );
    }

    #[test]
    fn test_typescript_class_methods_skip_keywords() {
        let source = "export class Api {\n  async fetch(url: string): Promise<void> {\n    if (url) {\n    }\n  }\n}\nexport const handler = async (req) => {\n}\nexport interface Options {\n}\n";
        assert_eq!(
            extract("src/api.ts", source),
            vec![
                row("Api", "class", None),
                row("fetch", "method", Some("Api")),
                row("handler", "function", None),
                row("Options", "interface", None),
            ]
        );
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        assert!(extract("README.md", "# fn main() {}").is_empty());
    }

    #[test]
    fn test_lines_are_one_based() {
        let extractor = RegexExtractor::new().unwrap();
        let symbols = extractor.extract_source("a.rs", "\n\nfn third() {}\n");
        assert_eq!(symbols[0].line, 3);
        assert_eq!(symbols[0].signature.as_deref(), Some("fn third() {}"));
        assert_eq!(symbols[0].language, "rust");
    }
}
