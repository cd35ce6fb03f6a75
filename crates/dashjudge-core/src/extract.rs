//! Turns raw completion text into a parsed JSON value.
//!
//! Completions are often wrapped in markdown fences, carry a BOM, or emit several
//! top-level objects separated by commas instead of a single array. [`extract`]
//! undoes those in a fixed order and then parses. Failure is a value, never a panic.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(Value),
    /// `raw_text` is always the untouched input, never the partially cleaned text.
    Unparsed { raw_text: String, error: String },
}

impl Extraction {
    pub fn is_success(&self) -> bool {
        matches!(self, Extraction::Parsed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Extraction::Parsed(v) => Some(v),
            Extraction::Unparsed { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Value, (String, String)> {
        match self {
            Extraction::Parsed(v) => Ok(v),
            Extraction::Unparsed { raw_text, error } => Err((raw_text, error)),
        }
    }
}

pub fn extract(text: &str) -> Extraction {
    let cleaned = clean(text);
    let candidate = if has_top_level_object_sequence(cleaned) {
        format!("[{}]", cleaned)
    } else {
        cleaned.to_string()
    };

    match serde_json::from_str::<Value>(&candidate) {
        Ok(v) => Extraction::Parsed(v),
        Err(e) => Extraction::Unparsed {
            raw_text: text.to_string(),
            error: e.to_string(),
        },
    }
}

/// Which wrappers [`clean`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSteps {
    pub bom: bool,
    pub fence: bool,
}

/// Trims whitespace, drops a leading BOM and strips a surrounding markdown fence.
pub fn clean(text: &str) -> &str {
    clean_with_steps(text).0
}

pub fn clean_with_steps(text: &str) -> (&str, CleanSteps) {
    let trimmed = text.trim();
    let (trimmed, bom) = match trimmed.strip_prefix('\u{feff}') {
        Some(rest) => (rest.trim(), true),
        None => (trimmed, false),
    };
    let stripped = strip_fence(trimmed);
    let fence = stripped.len() != trimmed.len();
    (stripped, CleanSteps { bom, fence })
}

fn strip_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let (Some(first_nl), Some(last_nl)) = (text.find('\n'), text.rfind('\n')) else {
        return text;
    };
    if text[last_nl + 1..].trim() != "```" {
        return text;
    }
    if first_nl == last_nl {
        return "";
    }
    text[first_nl + 1..last_nl].trim()
}

/// True when the text starts with `{` and a `}` is followed by `,` and `{` at
/// nesting depth zero, i.e. several objects were emitted without an enclosing array.
///
/// Separators nested inside a single object (`{"a":[{..},{..}]}`) do not count, so an
/// already valid document is never rewritten.
fn has_top_level_object_sequence(text: &str) -> bool {
    if !text.starts_with('{') {
        return false;
    }

    let mut depth: i32 = 0;
    let mut after_close = false;
    let mut saw_comma = false;

    for seg in segments(text) {
        let Segment::Code(code) = seg else {
            after_close = false;
            saw_comma = false;
            continue;
        };
        for c in code.chars() {
            match c {
                '{' | '[' => {
                    if c == '{' && depth == 0 && after_close && saw_comma {
                        return true;
                    }
                    depth += 1;
                    after_close = false;
                    saw_comma = false;
                }
                '}' | ']' => {
                    depth -= 1;
                    after_close = c == '}' && depth == 0;
                    saw_comma = false;
                }
                ',' if after_close => saw_comma = true,
                c if c.is_whitespace() => {}
                _ => {
                    after_close = false;
                    saw_comma = false;
                }
            }
        }
    }
    false
}

/// A slice of JSON-ish text: either a string literal (quotes included) or the code
/// between literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Code(&'a str),
    Literal(&'a str),
}

/// Splits text into code and string-literal segments so textual repairs never touch
/// the inside of a string. An unterminated literal runs to the end of the text.
pub(crate) fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                out.push(Segment::Literal(&text[start..=i]));
                start = i + 1;
                in_string = false;
            }
        } else if c == '"' {
            if start < i {
                out.push(Segment::Code(&text[start..i]));
            }
            start = i;
            in_string = true;
        }
    }

    if start < text.len() {
        let rest = &text[start..];
        out.push(if in_string {
            Segment::Literal(rest)
        } else {
            Segment::Code(rest)
        });
    }
    out
}

/// First balanced `open`..`close` fragment in the text, ignoring delimiters inside strings.
pub(crate) fn balanced_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' && start_idx.is_some() {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_roundtrips() {
        for raw in [
            r#"{"tabs":[{"maps":[{"layers":[{"id":1},{"id":2}]}]}]}"#,
            r#"[1, 2, 3]"#,
            r#""just a string""#,
            "42",
        ] {
            let expected: Value = serde_json::from_str(raw).unwrap();
            assert_eq!(extract(raw), Extraction::Parsed(expected), "input: {}", raw);
        }
    }

    #[test]
    fn test_object_sequence_becomes_array() {
        let got = extract(r#"{"a":1},{"b":2}"#);
        assert_eq!(got, Extraction::Parsed(json!([{"a": 1}, {"b": 2}])));

        let got = extract("{\"a\":1}\n ,\n {\"b\":2}");
        assert_eq!(got, Extraction::Parsed(json!([{"a": 1}, {"b": 2}])));
    }

    #[test]
    fn test_nested_separator_is_not_wrapped() {
        let raw = r#"{"layers":[{"id":1},{"id":2}]}"#;
        assert_eq!(
            extract(raw),
            Extraction::Parsed(json!({"layers": [{"id": 1}, {"id": 2}]}))
        );
    }

    #[test]
    fn test_separator_inside_string_is_ignored() {
        let raw = r#"{"note":"},{"}"#;
        assert_eq!(extract(raw), Extraction::Parsed(json!({"note": "},{"})));
    }

    #[test]
    fn test_markdown_fence_is_stripped() {
        let inner = r#"{"tabs": []}"#;
        let fenced = format!("```json\n{}\n```", inner);
        assert_eq!(extract(&fenced), extract(inner));

        let bare_fence = format!("  ```\n{}\n```  \n", inner);
        assert_eq!(extract(&bare_fence), extract(inner));
    }

    #[test]
    fn test_bom_is_stripped() {
        let got = extract("\u{feff}{\"a\": true}");
        assert_eq!(got, Extraction::Parsed(json!({"a": true})));
    }

    #[test]
    fn test_clean_reports_steps() {
        assert_eq!(
            clean_with_steps("\u{feff}{}"),
            ("{}", CleanSteps { bom: true, fence: false })
        );
        assert_eq!(
            clean_with_steps("```json\n{}\n```"),
            ("{}", CleanSteps { bom: false, fence: true })
        );
        assert_eq!(clean_with_steps(" {} ").1, CleanSteps::default());
    }

    #[test]
    fn test_failure_returns_original_text() {
        let raw = "```json\nSure! Here is your dashboard: {oops\n```";
        match extract(raw) {
            Extraction::Unparsed { raw_text, error } => {
                assert_eq!(raw_text, raw);
                assert!(!error.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_segments_split_literals() {
        let segs = segments(r#"{"a": "x\"y", "b": 1}"#);
        assert_eq!(
            segs,
            vec![
                Segment::Code("{"),
                Segment::Literal(r#""a""#),
                Segment::Code(": "),
                Segment::Literal(r#""x\"y""#),
                Segment::Code(", "),
                Segment::Literal(r#""b""#),
                Segment::Code(": 1}"),
            ]
        );
    }

    #[test]
    fn test_balanced_fragment_skips_prose() {
        let text = r#"Here you go: {"score": 8, "details": "a } inside"} thanks"#;
        assert_eq!(
            balanced_fragment(text, '{', '}'),
            Some(r#"{"score": 8, "details": "a } inside"}"#)
        );
        assert_eq!(balanced_fragment("no json", '{', '}'), None);
    }
}
