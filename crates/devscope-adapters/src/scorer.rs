//! Complexity scorer: cumulative Halstead effort over a commit's files.
//!
//! The tokenizer is deliberately language-light: identifiers and literals
//! count as operands, punctuation and control keywords as operators. That
//! is enough signal to rank commits by how much substance they carry;
//! non-source and unparseable files contribute 0.0 rather than failing.

use crate::repo::{FileSnapshot, RepoReader};
use std::collections::HashSet;

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "hpp", "cc", "rb",
    "php", "cs", "kt", "swift", "scala",
];

/// Keywords treated as operators across the supported languages.
const KEYWORD_OPERATORS: &[&str] = &[
    "if", "elif", "else", "for", "while", "return", "match", "case", "break", "continue",
    "def", "fn", "func", "function", "class", "struct", "enum", "impl", "trait", "interface",
    "import", "from", "use", "let", "const", "var", "mut", "pub", "async", "await", "yield",
    "try", "except", "catch", "finally", "raise", "throw", "with", "in", "not", "and", "or",
    "lambda", "new", "del", "switch", "loop", "where", "type",
];

/// Two-character operator tokens recognized greedily before single chars.
const DOUBLE_OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "->", "=>", "&&", "||", "+=", "-=", "*=", "/=", "::", "**", "<<",
    ">>", "..",
];

pub fn is_source_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TokenKind {
    Operator,
    Operand,
}

fn tokenize(code: &str) -> Vec<(TokenKind, String)> {
    let mut tokens = Vec::new();
    let bytes: Vec<char> = code.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Line comments: #, //, --
        if c == '#' || (c == '/' && bytes.get(i + 1) == Some(&'/')) {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
            continue;
        }

        // String literals count as a single operand.
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            while i < bytes.len() {
                if bytes[i] == '\\' {
                    i += 2;
                    continue;
                }
                if bytes[i] == quote {
                    i += 1;
                    break;
                }
                i += 1;
            }
            tokens.push((TokenKind::Operand, "<string>".to_string()));
            continue;
        }

        // Identifiers and keywords.
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
                i += 1;
            }
            let word: String = bytes[start..i].iter().collect();
            let kind = if KEYWORD_OPERATORS.contains(&word.as_str()) {
                TokenKind::Operator
            } else {
                TokenKind::Operand
            };
            tokens.push((kind, word));
            continue;
        }

        // Numeric literals.
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '.') {
                i += 1;
            }
            let number: String = bytes[start..i].iter().collect();
            tokens.push((TokenKind::Operand, number));
            continue;
        }

        // Punctuation operators, two-character forms first.
        if i + 1 < bytes.len() {
            let pair: String = bytes[i..i + 2].iter().collect();
            if DOUBLE_OPERATORS.contains(&pair.as_str()) {
                tokens.push((TokenKind::Operator, pair));
                i += 2;
                continue;
            }
        }
        tokens.push((TokenKind::Operator, c.to_string()));
        i += 1;
    }

    tokens
}

/// Halstead effort of one source body: difficulty * volume.
/// Returns 0.0 for empty or degenerate input.
pub fn halstead_effort(code: &str) -> f64 {
    let tokens = tokenize(code);
    if tokens.is_empty() {
        return 0.0;
    }

    let mut distinct_operators: HashSet<&str> = HashSet::new();
    let mut distinct_operands: HashSet<&str> = HashSet::new();
    let mut total_operators = 0u64;
    let mut total_operands = 0u64;

    for (kind, text) in &tokens {
        match kind {
            TokenKind::Operator => {
                distinct_operators.insert(text.as_str());
                total_operators += 1;
            }
            TokenKind::Operand => {
                distinct_operands.insert(text.as_str());
                total_operands += 1;
            }
        }
    }

    let n1 = distinct_operators.len() as f64;
    let n2 = distinct_operands.len() as f64;
    let big_n1 = total_operators as f64;
    let big_n2 = total_operands as f64;

    let vocabulary = n1 + n2;
    if vocabulary < 2.0 || n2 == 0.0 {
        return 0.0;
    }

    let volume = (big_n1 + big_n2) * vocabulary.log2();
    let difficulty = (n1 / 2.0) * (big_n2 / n2);
    difficulty * volume
}

fn effort_for_file(file: &FileSnapshot) -> f64 {
    if !is_source_file(&file.path) {
        return 0.0;
    }
    if file.content.trim().is_empty() {
        return 0.0;
    }
    halstead_effort(&file.content)
}

/// Cumulative effort over the files a merge commit changed. Any repository
/// access error scores 0.0 rather than failing the run.
pub fn score_commit(reader: &RepoReader, hash: &str) -> f64 {
    let total = reader
        .changed_files(hash)
        .map(|files| files.iter().map(effort_for_file).sum::<f64>())
        .unwrap_or(0.0);
    round2(total)
}

/// Cumulative effort over the commit's whole tree.
pub fn score_tree(reader: &RepoReader, hash: &str) -> f64 {
    let total = reader
        .tree_files(hash)
        .map(|files| files.iter().map(effort_for_file).sum::<f64>())
        .unwrap_or(0.0);
    round2(total)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
