//! Per-language symbol and relation extraction (§3, §4.3).
//!
//! Grounded in the teacher's brace/indentation end-line trackers: a
//! definition's end is found by counting `{`/`}` depth back to zero for
//! C-family languages, or by watching indentation fall back to (or below)
//! the definition line's own indent for Python. Neither approach parses a
//! real AST — both are line-oriented heuristics, matching the "best effort,
//! never panics" extraction contract in §9.

use crate::types::RelType;

#[derive(Debug, Clone)]
pub struct ExtractedSymbol {
    pub name: String,
    pub qualname: String,
    pub kind: String,
    pub line: i64,
    pub end_line: i64,
    pub parent_name: String,
    pub docstring: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedRelation {
    pub from_symbol: String,
    pub to_symbol: String,
    pub rel_type: RelType,
    pub line: i64,
}

enum Lang {
    Rust,
    Python,
    CFamily,
    Go,
    Unknown,
}

fn lang_for_extension(ext: &str) -> Lang {
    match ext {
        "rs" => Lang::Rust,
        "py" => Lang::Python,
        "go" => Lang::Go,
        "c" | "cpp" | "h" | "hpp" | "cc" | "java" | "js" | "jsx" | "ts" | "tsx" | "cs" | "kt"
        | "scala" | "swift" | "php" => Lang::CFamily,
        _ => Lang::Unknown,
    }
}

/// Extracts top-level symbols (and a best-effort call/implements graph)
/// from `content`, based on `extension` (without the leading dot).
///
/// Never panics: unrecognized languages simply yield no symbols.
#[must_use]
pub fn extract_symbols(content: &str, extension: &str) -> (Vec<ExtractedSymbol>, Vec<ExtractedRelation>) {
    match lang_for_extension(&extension.to_lowercase()) {
        Lang::Rust => extract_c_like(content, &RUST_DEFS, true),
        Lang::Python => extract_python(content),
        Lang::Go => extract_c_like(content, &GO_DEFS, false),
        Lang::CFamily => extract_c_like(content, &C_FAMILY_DEFS, false),
        Lang::Unknown => (Vec::new(), Vec::new()),
    }
}

struct DefPattern {
    keyword: &'static str,
    kind: &'static str,
}

const RUST_DEFS: [DefPattern; 5] = [
    DefPattern { keyword: "fn ", kind: "function" },
    DefPattern { keyword: "struct ", kind: "struct" },
    DefPattern { keyword: "enum ", kind: "enum" },
    DefPattern { keyword: "trait ", kind: "trait" },
    DefPattern { keyword: "impl ", kind: "impl" },
];

const GO_DEFS: [DefPattern; 2] = [
    DefPattern { keyword: "func ", kind: "function" },
    DefPattern { keyword: "type ", kind: "type" },
];

const C_FAMILY_DEFS: [DefPattern; 4] = [
    DefPattern { keyword: "function ", kind: "function" },
    DefPattern { keyword: "class ", kind: "class" },
    DefPattern { keyword: "interface ", kind: "interface" },
    DefPattern { keyword: "struct ", kind: "struct" },
];

fn extract_c_like(content: &str, defs: &[DefPattern], rust_style: bool) -> (Vec<ExtractedSymbol>, Vec<ExtractedRelation>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut symbols = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        for def in defs {
            let Some(rest) = trimmed.strip_prefix(def.keyword) else { continue };
            let Some(name) = parse_identifier(rest) else { continue };
            let start_line = (idx + 1) as i64;
            let end_line = find_brace_end(&lines, idx);
            let qualname = if rust_style && def.kind == "impl" {
                format!("impl:{name}")
            } else {
                name.clone()
            };
            symbols.push(ExtractedSymbol {
                name,
                qualname,
                kind: def.kind.to_string(),
                line: start_line,
                end_line,
                parent_name: String::new(),
                docstring: String::new(),
            });
            break;
        }
    }

    let relations = extract_calls(&lines, &symbols);
    (symbols, relations)
}

fn extract_python(content: &str) -> (Vec<ExtractedSymbol>, Vec<ExtractedRelation>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut symbols = Vec::new();
    let mut relations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim_start();

        let (kind, rest) = if let Some(r) = trimmed.strip_prefix("def ") {
            ("function", r)
        } else if let Some(r) = trimmed.strip_prefix("async def ") {
            ("function", r)
        } else if let Some(r) = trimmed.strip_prefix("class ") {
            ("class", r)
        } else {
            continue;
        };

        let Some(name) = parse_identifier(rest) else { continue };
        let end_line = find_indent_end(&lines, idx, indent);

        if kind == "class" {
            if let Some(base) = parse_class_base(rest) {
                relations.push(ExtractedRelation {
                    from_symbol: name.clone(),
                    to_symbol: base,
                    rel_type: RelType::Extends,
                    line: (idx + 1) as i64,
                });
            }
        }

        symbols.push(ExtractedSymbol {
            name,
            qualname: rest.to_string(),
            kind: kind.to_string(),
            line: (idx + 1) as i64,
            end_line,
            parent_name: String::new(),
            docstring: String::new(),
        });
    }

    relations.extend(extract_calls(&lines, &symbols));
    (symbols, relations)
}

/// Pulls the identifier immediately following a definition keyword, stopping
/// at the first character that can't be part of a name (`(`, `<`, `:`, ` `,
/// `{`).
fn parse_identifier(rest: &str) -> Option<String> {
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `class Foo(Base):` -> `Base`. Ignores multi-base classes beyond the first.
fn parse_class_base(rest: &str) -> Option<String> {
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let inner = rest[open + 1..close].trim();
    let first = inner.split(',').next()?.trim();
    if first.is_empty() || first == "object" {
        None
    } else {
        Some(first.to_string())
    }
}

/// Finds the end line (1-based, inclusive) of a brace-delimited block
/// starting at `start_idx` by counting `{`/`}` depth. Returns `start_idx + 1`
/// (as a 1-based line) if no opening brace is found on the definition line
/// within a short lookahead (e.g. a Rust trait method signature with no body).
fn find_brace_end(lines: &[&str], start_idx: usize) -> i64 {
    let mut depth = 0i64;
    let mut seen_open = false;
    let lookahead_limit = (start_idx + 3).min(lines.len());

    for (offset, line) in lines.iter().enumerate().skip(start_idx) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if seen_open && depth <= 0 {
            return (offset + 1) as i64;
        }
        if !seen_open && offset >= lookahead_limit && offset > start_idx {
            break;
        }
    }
    (start_idx + 1) as i64
}

/// Finds the end line (1-based, inclusive) of an indentation-delimited block:
/// the last line before indentation returns to `<= base_indent` (blank lines
/// don't count toward the boundary).
fn find_indent_end(lines: &[&str], start_idx: usize, base_indent: usize) -> i64 {
    let mut last_body_line = start_idx;
    for (offset, line) in lines.iter().enumerate().skip(start_idx + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent <= base_indent {
            break;
        }
        last_body_line = offset;
    }
    (last_body_line + 1) as i64
}

/// Best-effort call-graph extraction: within each symbol's body, look for
/// `other_symbol(` occurrences referencing a different known symbol in the
/// same file. Cheap and intra-file only; cross-file calls need the full
/// relation table joined at query time (`get_callers`), which this feeds.
fn extract_calls(lines: &[&str], symbols: &[ExtractedSymbol]) -> Vec<ExtractedRelation> {
    let mut relations = Vec::new();
    for sym in symbols {
        if sym.kind != "function" {
            continue;
        }
        let start = (sym.line - 1).max(0) as usize;
        let end = (sym.end_line as usize).min(lines.len());
        if start >= end {
            continue;
        }
        for (offset, line) in lines[start..end].iter().enumerate() {
            for other in symbols {
                if other.name == sym.name || other.kind != "function" {
                    continue;
                }
                let needle = format!("{}(", other.name);
                if line.contains(&needle) {
                    relations.push(ExtractedRelation {
                        from_symbol: sym.name.clone(),
                        to_symbol: other.name.clone(),
                        rel_type: RelType::Calls,
                        line: (start + offset + 1) as i64,
                    });
                }
            }
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rust_functions_with_brace_end() {
        let src = "fn foo() {\n    bar();\n}\n\nfn bar() {\n    println!(\"hi\");\n}\n";
        let (symbols, relations) = extract_symbols(src, "rs");
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "foo");
        assert_eq!(symbols[0].end_line, 3);
        assert!(relations.iter().any(|r| r.from_symbol == "foo" && r.to_symbol == "bar"));
    }

    #[test]
    fn extracts_python_class_with_indent_end() {
        let src = "class Base:\n    pass\n\nclass Derived(Base):\n    def method(self):\n        return 1\n";
        let (symbols, relations) = extract_symbols(src, "py");
        let derived = symbols.iter().find(|s| s.name == "Derived").unwrap();
        assert_eq!(derived.end_line, 6);
        assert!(relations
            .iter()
            .any(|r| r.from_symbol == "Derived" && r.to_symbol == "Base" && r.rel_type == RelType::Extends));
    }

    #[test]
    fn unknown_extension_yields_nothing() {
        let (symbols, relations) = extract_symbols("whatever", "bin");
        assert!(symbols.is_empty());
        assert!(relations.is_empty());
    }
}
