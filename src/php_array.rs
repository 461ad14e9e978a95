//! Reader and writer for grouped translation files.
//!
//! Grouped files are PHP sources of the form `<?php return [ ... ];`. Only the
//! data subset of the language is understood: array literals (short and
//! `array(...)` syntax), quoted strings with `.` concatenation, numbers,
//! booleans and `null`. Anything else is rejected instead of evaluated.
//!
//! Arrays are represented as ordered `serde_json` objects, so a parsed file and
//! a rendered file share one representation with the rest of the pipeline.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PhpArrayError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("file does not return an array")]
    NotArray,
}

/// Parse a grouped translation file and return its array as a JSON object.
pub fn parse_return_array(source: &str) -> Result<Map<String, Value>, PhpArrayError> {
    let mut parser = Parser::new(source);
    parser.parse_file()
}

/// Render an array as a complete grouped translation file.
pub fn render_return_array(array: &Map<String, Value>) -> String {
    format!("<?php\n\nreturn {};\n", render_array(array, 1))
}

fn render_array(array: &Map<String, Value>, depth: usize) -> String {
    if array.is_empty() {
        return "[]".to_string();
    }

    let indent = "    ".repeat(depth);
    let items: Vec<String> = array
        .iter()
        .map(|(key, value)| format!("{indent}{} => {}", export_key(key), export_value(value, depth)))
        .collect();

    format!("[\n{},\n{}]", items.join(",\n"), "    ".repeat(depth - 1))
}

fn export_key(key: &str) -> String {
    if is_integer_key(key) {
        key.to_string()
    } else {
        export_string(key)
    }
}

fn export_value(value: &Value, depth: usize) -> String {
    match value {
        Value::Object(map) => render_array(map, depth + 1),
        Value::Array(items) => {
            let map: Map<String, Value> = items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect();
            render_array(&map, depth + 1)
        }
        Value::String(s) => export_string(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
    }
}

fn export_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Whether an array key is stored as an integer (decimal, no leading zeros).
pub fn is_integer_key(key: &str) -> bool {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return false;
    }
    if key == "-0" {
        return false;
    }
    key.parse::<i64>().is_ok()
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let src = src.strip_prefix('\u{feff}').unwrap_or(src);
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn parse_file(&mut self) -> Result<Map<String, Value>, PhpArrayError> {
        self.skip_whitespace();
        if self.src[self.pos..].starts_with("<?php") {
            self.pos += "<?php".len();
        }
        self.skip_trivia();

        if self.eat_keyword("declare") {
            self.skip_until_semicolon()?;
            self.skip_trivia();
        }

        if !self.eat_keyword("return") {
            return Err(PhpArrayError::NotArray);
        }

        let value = self.parse_expr()?;
        let Value::Object(array) = value else {
            return Err(PhpArrayError::NotArray);
        };

        self.skip_trivia();
        self.eat(b';');
        self.skip_trivia();
        if self.src[self.pos..].starts_with("?>") {
            self.pos += 2;
            self.skip_whitespace();
        }
        if self.pos < self.bytes.len() {
            return Err(self.error("unexpected content after the returned array"));
        }

        Ok(array)
    }

    fn parse_expr(&mut self) -> Result<Value, PhpArrayError> {
        let mut value = self.parse_term()?;

        loop {
            self.skip_trivia();
            if self.peek() != Some(b'.') {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_term()?;
            let left = concat_operand(&value).ok_or_else(|| self.error("cannot concatenate an array"))?;
            let right = concat_operand(&rhs).ok_or_else(|| self.error("cannot concatenate an array"))?;
            value = Value::String(left + &right);
        }

        Ok(value)
    }

    fn parse_term(&mut self) -> Result<Value, PhpArrayError> {
        self.skip_trivia();
        match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                self.parse_array_body(b']')
            }
            Some(b'\'') => self.parse_single_quoted().map(Value::String),
            Some(b'"') => self.parse_double_quoted().map(Value::String),
            Some(b) if b.is_ascii_digit() || b == b'-' || b == b'+' => self.parse_number(),
            Some(_) => {
                if self.eat_keyword("array") {
                    self.skip_trivia();
                    if !self.eat(b'(') {
                        return Err(self.error("expected '(' after array"));
                    }
                    return self.parse_array_body(b')');
                }
                if self.eat_keyword("true") {
                    return Ok(Value::Bool(true));
                }
                if self.eat_keyword("false") {
                    return Ok(Value::Bool(false));
                }
                if self.eat_keyword("null") {
                    return Ok(Value::Null);
                }
                Err(self.error("unsupported expression, only literal values are allowed"))
            }
            None => Err(self.error("unexpected end of file")),
        }
    }

    fn parse_array_body(&mut self, close: u8) -> Result<Value, PhpArrayError> {
        let mut array = Map::new();
        let mut next_index: i64 = 0;

        loop {
            self.skip_trivia();
            if self.eat(close) {
                break;
            }

            let first = self.parse_expr()?;
            self.skip_trivia();

            if self.src[self.pos..].starts_with("=>") {
                self.pos += 2;
                let value = self.parse_expr()?;
                let key = self.array_key(&first)?;
                if let Ok(index) = key.parse::<i64>() {
                    if is_integer_key(&key) && index >= next_index {
                        next_index = index + 1;
                    }
                }
                array.insert(key, value);
            } else {
                array.insert(next_index.to_string(), first);
                next_index += 1;
            }

            self.skip_trivia();
            if self.eat(b',') {
                continue;
            }
            if self.eat(close) {
                break;
            }
            return Err(self.error(&format!("expected ',' or '{}'", close as char)));
        }

        Ok(Value::Object(array))
    }

    fn array_key(&self, key: &Value) -> Result<String, PhpArrayError> {
        match key {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .unwrap_or_default()
                .to_string()),
            Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            Value::Null => Ok(String::new()),
            Value::Array(_) | Value::Object(_) => Err(self.error("arrays cannot be used as keys")),
        }
    }

    fn parse_single_quoted(&mut self) -> Result<String, PhpArrayError> {
        let start_line = self.line();
        self.pos += 1;
        let mut out = String::new();

        while let Some(c) = self.next_char() {
            match c {
                '\'' => return Ok(out),
                '\\' => match self.peek() {
                    Some(b'\\') | Some(b'\'') => {
                        out.push(self.bytes[self.pos] as char);
                        self.pos += 1;
                    }
                    _ => out.push('\\'),
                },
                other => out.push(other),
            }
        }

        Err(PhpArrayError::Syntax {
            line: start_line,
            message: "unterminated string".to_string(),
        })
    }

    fn parse_double_quoted(&mut self) -> Result<String, PhpArrayError> {
        let start_line = self.line();
        self.pos += 1;
        let mut out = String::new();

        while let Some(c) = self.next_char() {
            match c {
                '"' => return Ok(out),
                '$' if matches!(self.peek(), Some(b) if b == b'_' || b.is_ascii_alphabetic() || b == b'{') => {
                    return Err(self.error("interpolated strings are not supported"));
                }
                '{' if self.peek() == Some(b'$') => {
                    return Err(self.error("interpolated strings are not supported"));
                }
                '\\' => self.double_quoted_escape(&mut out),
                other => out.push(other),
            }
        }

        Err(PhpArrayError::Syntax {
            line: start_line,
            message: "unterminated string".to_string(),
        })
    }

    fn double_quoted_escape(&mut self, out: &mut String) {
        let Some(b) = self.peek() else {
            out.push('\\');
            return;
        };

        let simple = match b {
            b'n' => Some('\n'),
            b't' => Some('\t'),
            b'r' => Some('\r'),
            b'v' => Some('\u{0b}'),
            b'e' => Some('\u{1b}'),
            b'f' => Some('\u{0c}'),
            b'\\' => Some('\\'),
            b'$' => Some('$'),
            b'"' => Some('"'),
            _ => None,
        };
        if let Some(c) = simple {
            out.push(c);
            self.pos += 1;
            return;
        }

        if (b'0'..=b'7').contains(&b) {
            let digits = self.take_while_max(3, |b| (b'0'..=b'7').contains(&b));
            if let Ok(code) = u32::from_str_radix(digits, 8) {
                out.push(char::from_u32(code & 0xff).unwrap_or('\u{fffd}'));
            }
            return;
        }

        if b == b'x' {
            let save = self.pos;
            self.pos += 1;
            let digits = self.take_while_max(2, |b| b.is_ascii_hexdigit());
            if digits.is_empty() {
                self.pos = save;
                out.push('\\');
            } else if let Ok(code) = u32::from_str_radix(digits, 16) {
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            return;
        }

        if b == b'u' && self.bytes.get(self.pos + 1) == Some(&b'{') {
            let save = self.pos;
            self.pos += 2;
            let digits = self.take_while_max(6, |b| b.is_ascii_hexdigit());
            let code = u32::from_str_radix(digits, 16).ok().and_then(char::from_u32);
            match code {
                Some(c) if self.eat(b'}') => out.push(c),
                _ => {
                    self.pos = save;
                    out.push('\\');
                }
            }
            return;
        }

        out.push('\\');
    }

    fn parse_number(&mut self) -> Result<Value, PhpArrayError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-') | Some(b'+')) {
            self.pos += 1;
        }
        self.take_while_max(usize::MAX, |b| b.is_ascii_digit() || b == b'_');
        let mut is_float = false;
        if self.peek() == Some(b'.')
            && self.bytes.get(self.pos + 1).is_some_and(|b| b.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            self.take_while_max(usize::MAX, |b| b.is_ascii_digit() || b == b'_');
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'-') | Some(b'+')) {
                self.pos += 1;
            }
            self.take_while_max(usize::MAX, |b| b.is_ascii_digit());
        }

        let literal: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        let literal = literal.trim_start_matches('+');

        let number = if is_float {
            literal.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            literal.parse::<i64>().ok().map(Number::from)
        };

        number
            .map(Value::Number)
            .ok_or_else(|| self.error(&format!("invalid number '{}'", literal)))
    }

    fn skip_until_semicolon(&mut self) -> Result<(), PhpArrayError> {
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b';' {
                return Ok(());
            }
        }
        Err(self.error("unterminated declare statement"))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.skip_whitespace();
            let rest = &self.src[self.pos..];
            if rest.starts_with("//") || rest.starts_with('#') {
                let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
                self.pos += end;
            } else if rest.starts_with("/*") {
                let end = rest[2..].find("*/").map_or(rest.len(), |i| i + 4);
                self.pos += end;
            } else {
                break;
            }
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = &self.bytes[self.pos..];
        if rest.len() < keyword.len() || !rest[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes()) {
            return false;
        }
        if rest
            .get(keyword.len())
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            return false;
        }
        self.pos += keyword.len();
        true
    }

    fn take_while_max(&mut self, max: usize, pred: impl Fn(u8) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.pos - start < max && self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.src[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn line(&self) -> usize {
        self.bytes[..self.pos].iter().filter(|b| **b == b'\n').count() + 1
    }

    fn error(&self, message: &str) -> PhpArrayError {
        PhpArrayError::Syntax {
            line: self.line(),
            message: message.to_string(),
        }
    }
}

fn concat_operand(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) | Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_single_line_file() {
        let source = r#"<?php return [
            "failed" => "These credentials do not match our records.",
            "password" => "The provided password is incorrect.",
            "throttle" => "Too many login attempts."
        ];"#;

        let array = parse_return_array(source).unwrap();

        assert_eq!(array.len(), 3);
        assert_eq!(array["failed"], "These credentials do not match our records.");
        assert_eq!(array["throttle"], "Too many login attempts.");
    }

    #[test]
    fn test_parse_nested_arrays_and_comments() {
        let source = r#"<?php

declare(strict_types=1);

/*
|--------------------------------------------------------------------------
| Validation Language Lines
|--------------------------------------------------------------------------
*/

return [
    'accepted' => 'The :attribute must be accepted.', // inline
    # hash comment
    'between' => [
        'numeric' => 'The :attribute must be between :min and :max.',
        'string'  => 'The :attribute must be between :min and :max characters.',
    ],
    'custom' => array(
        'attribute-name' => array('rule-name' => 'custom-message'),
    ),
];
"#;

        let array = parse_return_array(source).unwrap();

        assert_eq!(array["accepted"], "The :attribute must be accepted.");
        assert_eq!(
            array["between"]["string"],
            "The :attribute must be between :min and :max characters."
        );
        assert_eq!(array["custom"]["attribute-name"]["rule-name"], "custom-message");
    }

    #[test]
    fn test_parse_preserves_order() {
        let array = parse_return_array("<?php return ['z' => '1', 'a' => '2', 'm' => '3'];").unwrap();
        let keys: Vec<&String> = array.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_parse_auto_index() {
        let array = parse_return_array("<?php return ['a', 5 => 'b', 'c', '7' => 'd', 'e'];").unwrap();

        assert_eq!(array["0"], "a");
        assert_eq!(array["5"], "b");
        assert_eq!(array["6"], "c");
        assert_eq!(array["7"], "d");
        assert_eq!(array["8"], "e");
    }

    #[test]
    fn test_parse_string_escapes() {
        let array = parse_return_array(
            r#"<?php return [
                'single' => 'It\'s a \\ backslash and \n stays',
                'double' => "Line\nbreak \"quoted\" \x41 \u{1F600} \$price",
            ];"#,
        )
        .unwrap();

        assert_eq!(array["single"], "It's a \\ backslash and \\n stays");
        assert_eq!(array["double"], "Line\nbreak \"quoted\" A \u{1F600} $price");
    }

    #[test]
    fn test_parse_scalars_and_concatenation() {
        let array = parse_return_array(
            "<?php return ['n' => 42, 'f' => 1.5, 'neg' => -3, 't' => TRUE, 'x' => null, 'c' => 'a' . 'b' . 1];",
        )
        .unwrap();

        assert_eq!(array["n"], json!(42));
        assert_eq!(array["f"], json!(1.5));
        assert_eq!(array["neg"], json!(-3));
        assert_eq!(array["t"], json!(true));
        assert_eq!(array["x"], Value::Null);
        assert_eq!(array["c"], "ab1");
    }

    #[test]
    fn test_parse_unicode_values() {
        let array = parse_return_array("<?php return ['hello' => 'Привіт', 'ok' => 'Dobrze ✓'];").unwrap();
        assert_eq!(array["hello"], "Привіт");
        assert_eq!(array["ok"], "Dobrze ✓");
    }

    #[test]
    fn test_parse_rejects_non_array_return() {
        assert_eq!(
            parse_return_array("<?php return 'just a string';"),
            Err(PhpArrayError::NotArray)
        );
        assert_eq!(parse_return_array("<?php echo 'hi';"), Err(PhpArrayError::NotArray));
    }

    #[test]
    fn test_parse_rejects_code() {
        let err = parse_return_array("<?php\nreturn [\n    'a' => trans('b'),\n];").unwrap_err();
        assert!(matches!(err, PhpArrayError::Syntax { line: 3, .. }), "got {:?}", err);

        let err = parse_return_array("<?php return ['a' => \"Hi $name\"];").unwrap_err();
        assert!(err.to_string().contains("interpolated"));
    }

    #[test]
    fn test_parse_rejects_unterminated_input() {
        assert!(parse_return_array("<?php return ['a' => 'b'").is_err());
        assert!(parse_return_array("<?php return ['a' => 'b];").is_err());
        assert!(parse_return_array("<?php return ['a' => 'b']; echo 1;").is_err());
    }

    // ==================== Rendering Tests ====================

    #[test]
    fn test_render_nested_array() {
        let value = json!({ "errors": { "required": "Required" } });
        let rendered = render_return_array(value.as_object().unwrap());

        assert_eq!(
            rendered,
            "<?php\n\nreturn [\n    'errors' => [\n        'required' => 'Required',\n    ],\n];\n"
        );
    }

    #[test]
    fn test_render_empty_array() {
        assert_eq!(render_return_array(&Map::new()), "<?php\n\nreturn [];\n");
    }

    #[test]
    fn test_render_quotes_and_integer_keys() {
        let value = json!({ "0": "first", "007": "bond", "it's": "a \\ path" });
        let rendered = render_return_array(value.as_object().unwrap());

        assert!(rendered.contains("    0 => 'first',"));
        assert!(rendered.contains("    '007' => 'bond',"));
        assert!(rendered.contains("    'it\\'s' => 'a \\\\ path',"));
    }

    #[test]
    fn test_render_then_parse_returns_same_array() {
        let value = json!({
            "title": "Dashboard",
            "menu": { "home": "Home", "quote": "Don't \"panic\"" },
            "items": { "0": "one", "1": "two" },
        });
        let array = value.as_object().unwrap();

        let parsed = parse_return_array(&render_return_array(array)).unwrap();

        assert_eq!(&parsed, array);
    }

    #[test]
    fn test_is_integer_key() {
        assert!(is_integer_key("0"));
        assert!(is_integer_key("42"));
        assert!(is_integer_key("-7"));
        assert!(!is_integer_key("007"));
        assert!(!is_integer_key("-0"));
        assert!(!is_integer_key("1.5"));
        assert!(!is_integer_key(""));
        assert!(!is_integer_key("99999999999999999999"));
    }
}
