//! Reply decoding.
//!
//! Turns the text between a request's sentinels into a [`ParsedValue`] or a
//! classified error. Decoding strategies are tried in a fixed order:
//!
//! 1. error sentinel qualified by the request's marker (absolute precedence)
//! 2. value-echo line (`=> 2`, `=> "ok"`, `=> nil`)
//! 3. the whole slice as a JSON document
//! 4. the first embedded JSON array/object
//! 5. scalar heuristics on the whole slice
//!
//! A `nil` echo only wins when nothing else was printed: snippets such as
//! `puts rows.to_json` return nil, so their output goes through steps 3-5
//! first. Anything else is a `ParseFailure`; raw text is never passed off as
//! a value.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use replwire_core::error::bounded_excerpt;
use replwire_core::{
    ClassifiedError, ErrorKind, ParsedValue, ParserSettings, RawExchange, Result,
};

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"^[-+]?\d+$").unwrap();
    static ref FLOAT: Regex = Regex::new(r"^[-+]?\d+\.\d+([eE][-+]?\d+)?$").unwrap();
    static ref CONSTANT: Regex = Regex::new(r"^[A-Z][A-Za-z0-9_]*(::[A-Z][A-Za-z0-9_]*)*$").unwrap();
}

/// Decodes sentinel-delimited reply text.
#[derive(Debug, Clone)]
pub struct OutputParser {
    echo_prefixes: Vec<String>,
    excerpt_chars: usize,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::from_settings(&ParserSettings::default())
    }
}

impl OutputParser {
    /// Create a parser with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser from configuration.
    pub fn from_settings(settings: &ParserSettings) -> Self {
        Self {
            echo_prefixes: settings
                .echo_prefixes
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
            excerpt_chars: settings.excerpt_chars,
        }
    }

    /// Decode an exchange into a value.
    pub fn parse(&self, raw: &RawExchange) -> Result<ParsedValue> {
        if raw.error_marker_found {
            return Err(self.remote_exception(raw).into());
        }

        let text = raw.full_capture.as_str();

        match self.parse_echo(text)? {
            Some(ParsedValue::Nil) => {
                let printed = self.printed_output(text);
                if let Some(value) = self.decode_text(printed.trim()) {
                    debug!("Nil echo; decoded {} from printed output", value.type_name());
                    return Ok(value);
                }
                debug!("Decoded nil from value echo");
                return Ok(ParsedValue::Nil);
            }
            Some(value) => {
                debug!("Decoded {} from value echo", value.type_name());
                return Ok(value);
            }
            None => {}
        }

        let trimmed = text.trim();
        if let Some(value) = self.decode_text(trimmed) {
            return Ok(value);
        }
        check_integer_range(trimmed, self.excerpt_chars)?;

        warn!(
            "Reply for marker {} matched no encoding ({} chars)",
            raw.marker_id,
            trimmed.len()
        );
        Err(ClassifiedError::parse_failure(&bounded_excerpt(trimmed, self.excerpt_chars)).into())
    }

    /// Steps 3-5 on text without a usable echo.
    fn decode_text(&self, trimmed: &str) -> Option<ParsedValue> {
        if let Some(value) = parse_document(trimmed) {
            debug!("Decoded {} from whole-slice JSON", value.type_name());
            return Some(value);
        }

        if let Some(value) = find_embedded_document(trimmed) {
            debug!("Decoded {} from embedded JSON", value.type_name());
            return Some(value);
        }

        let value = parse_scalar(trimmed)?;
        debug!("Decoded {} from scalar fallback", value.type_name());
        Some(value)
    }

    /// Check an exchange evaluated for side effects only.
    pub fn parse_unit(&self, raw: &RawExchange) -> Result<()> {
        if raw.error_marker_found {
            return Err(self.remote_exception(raw).into());
        }
        Ok(())
    }

    fn remote_exception(&self, raw: &RawExchange) -> ClassifiedError {
        let sentinel = raw.marker_id.error_sentinel();
        let mut lines = raw.full_capture.lines();
        let mut detail = Vec::new();

        for line in lines.by_ref() {
            if let Some(rest) = line.trim_start().strip_prefix(&sentinel) {
                detail.push(rest.trim().to_string());
                break;
            }
        }
        detail.extend(
            lines
                .map(str::trim_end)
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );

        let message = if detail.is_empty() {
            "remote code raised".to_string()
        } else {
            detail.join("\n")
        };

        let excerpt = bounded_excerpt(raw.full_capture.trim(), self.excerpt_chars);
        let class = message
            .split_once(": ")
            .map(|(class, _)| class.trim())
            .filter(|class| CONSTANT.is_match(class))
            .map(str::to_string);

        debug!("Remote exception for marker {}: {}", raw.marker_id, message);
        let err = ClassifiedError::remote_exception(message, &excerpt);
        match class {
            Some(class) => err.with_remote_class(class),
            None => err,
        }
    }

    fn strip_echo<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.echo_prefixes
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix.as_str()))
    }

    fn parse_echo(&self, text: &str) -> Result<Option<ParsedValue>> {
        for rest in text.lines().filter_map(|line| self.strip_echo(line)) {
            let rest = rest.trim();
            if let Some(value) = parse_literal(rest) {
                return Ok(Some(value));
            }
            check_integer_range(rest, self.excerpt_chars)?;
        }
        Ok(None)
    }

    /// The slice with echo lines removed.
    fn printed_output(&self, text: &str) -> String {
        text.lines()
            .filter(|line| self.strip_echo(line).is_none())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Integer literals that do not fit an `Int` fail loudly instead of falling
/// through to a generic parse failure.
fn check_integer_range(text: &str, excerpt_chars: usize) -> Result<()> {
    if INTEGER.is_match(text) && text.parse::<i64>().is_err() {
        return Err(ClassifiedError::new(
            ErrorKind::ParseFailure,
            "integer literal out of range for a 64-bit value",
            bounded_excerpt(text, excerpt_chars),
        )
        .into());
    }
    Ok(())
}

/// Literal forms accepted after an echo prefix.
fn parse_literal(text: &str) -> Option<ParsedValue> {
    match text {
        "nil" | "null" => return Some(ParsedValue::Nil),
        "true" => return Some(ParsedValue::Bool(true)),
        "false" => return Some(ParsedValue::Bool(false)),
        _ => {}
    }
    if INTEGER.is_match(text) {
        return text.parse::<i64>().ok().map(ParsedValue::Int);
    }
    if FLOAT.is_match(text) {
        return text.parse::<f64>().ok().map(ParsedValue::Float);
    }
    unquote(text).map(ParsedValue::Str)
}

/// Scalar fallback on a whole slice.
fn parse_scalar(text: &str) -> Option<ParsedValue> {
    if text.is_empty() || text.contains('\n') {
        return None;
    }
    parse_literal(text)
}

/// Whole text as a JSON array or object.
fn parse_document(text: &str) -> Option<ParsedValue> {
    if !(text.starts_with('[') || text.starts_with('{')) {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_array() || value.is_object() => Some(ParsedValue::from(value)),
        _ => None,
    }
}

/// First balanced `[...]`/`{...}` span that parses as JSON.
fn find_embedded_document(text: &str) -> Option<ParsedValue> {
    for (start, ch) in text.char_indices() {
        if ch != '[' && ch != '{' {
            continue;
        }
        if let Some(end) = balanced_end(&text[start..]) {
            if let Some(value) = parse_document(&text[start..start + end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Byte length of the balanced span opening at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip matching quotes and decode the usual escapes.
pub fn unquote(text: &str) -> Option<String> {
    let quote = text.chars().next()?;
    if !(quote == '"' || quote == '\'') || text.len() < 2 || !text.ends_with(quote) {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    if quote == '\'' {
        return Some(inner.replace("\\'", "'").replace("\\\\", "\\"));
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('e') => out.push('\u{1b}'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let mut hex = String::new();
                if chars.peek() == Some(&'{') {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        hex.push(c);
                    }
                } else {
                    for _ in 0..4 {
                        if let Some(c) = chars.next() {
                            hex.push(c);
                        }
                    }
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}
