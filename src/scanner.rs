//! Translation key extraction from PHP and Blade sources.
//!
//! Recognized call forms are `__(...)`, `trans(...)` and `@lang(...)` (the
//! Blade `{{ __(...) }}` form is a `__(` call) whose first argument is a
//! single- or double-quoted literal, optionally followed by a parameter list.
//! The scanner tracks quote escaping and delimiter depth instead of relying on
//! regular expressions, so parameter lists may contain nested calls, arrays
//! and strings with parentheses, and may span several lines.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Function names that take a translation key as their first argument.
const CALL_FORMS: &[&str] = &["__", "trans", "@lang"];

/// Scan every `.php` / `.blade.php` file under `roots` and collect the
/// distinct translation keys.
///
/// Roots that do not exist are skipped.
pub fn scan_directories(roots: &[PathBuf]) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();

    for file in files_to_scan(roots)? {
        let bytes = std::fs::read(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let content = String::from_utf8_lossy(&bytes);

        let found = extract_keys(&content);
        debug!(file = %file.display(), keys = found.len(), "Scanned file");
        keys.extend(found);
    }

    Ok(keys)
}

/// List the PHP and Blade files below the given roots, sorted by path.
pub fn files_to_scan(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for root in roots {
        if !root.is_dir() {
            warn!(path = %root.display(), "Scan path is not a directory, skipping");
            continue;
        }

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if entry.file_type().is_file() && is_source_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    Ok(files)
}

fn is_source_file(path: &Path) -> bool {
    // `.blade.php` shares the `php` extension
    path.extension().is_some_and(|ext| ext == "php")
}

/// Extract the translation keys used in one source file.
///
/// Keys are unescaped and trimmed; empty keys are dropped. Duplicates within
/// the file are preserved in order of appearance.
pub fn extract_keys(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut keys = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(open_paren) = call_at(bytes, pos) else {
            pos += 1;
            continue;
        };

        match parse_call(source, open_paren + 1) {
            Some((literal, resume)) => {
                let key = unescape(literal);
                let key = key.trim();
                if !key.is_empty() {
                    keys.push(key.to_string());
                }
                // Resume after the literal so calls nested in the
                // parameter list are found too
                pos = resume;
            }
            None => pos = open_paren + 1,
        }
    }

    keys
}

/// If a recognized call form starts at `pos`, return the index of its `(`.
fn call_at(bytes: &[u8], pos: usize) -> Option<usize> {
    for form in CALL_FORMS {
        let name = form.as_bytes();
        if !bytes[pos..].starts_with(name) {
            continue;
        }
        if !form.starts_with('@') && pos > 0 && is_ident_byte(bytes[pos - 1]) {
            continue;
        }
        let after = pos + name.len();
        if bytes.get(after) == Some(&b'(') {
            return Some(after);
        }
    }
    None
}

/// Parse the argument list of a call starting right after its `(`.
///
/// Returns the raw first-argument literal and the index just past it, or
/// `None` when the arguments do not form a recognized call.
fn parse_call(source: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = source.as_bytes();
    let mut pos = skip_whitespace(bytes, start);

    let quote = *bytes.get(pos)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let literal_start = pos + 1;
    let literal_end = find_closing_quote(bytes, literal_start, quote)?;
    let literal = &source[literal_start..literal_end];
    let resume = literal_end + 1;

    pos = skip_whitespace(bytes, resume);
    match bytes.get(pos)? {
        b')' => Some((literal, resume)),
        b',' => {
            close_parameter_list(bytes, pos + 1)?;
            Some((literal, resume))
        }
        _ => None,
    }
}

/// Find the unescaped closing `quote`, returning its index.
fn find_closing_quote(bytes: &[u8], mut pos: usize, quote: u8) -> Option<usize> {
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b if b == quote => return Some(pos),
            _ => pos += 1,
        }
    }
    None
}

/// Consume a parameter list up to the call's own closing paren.
///
/// Returns the index of that paren. Delimiters inside quoted strings are
/// ignored; a mismatched closing delimiter aborts the match.
fn close_parameter_list(bytes: &[u8], mut pos: usize) -> Option<usize> {
    let mut stack: Vec<u8> = vec![b')'];

    while pos < bytes.len() {
        match bytes[pos] {
            b'\'' | b'"' => {
                pos = find_closing_quote(bytes, pos + 1, bytes[pos])?;
            }
            b'(' => stack.push(b')'),
            b'[' => stack.push(b']'),
            b'{' => stack.push(b'}'),
            b @ (b')' | b']' | b'}') => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(pos);
                }
            }
            _ => {}
        }
        pos += 1;
    }

    None
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Drop backslash escapes: `\x` becomes `x` and `\\` becomes `\`.
fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
