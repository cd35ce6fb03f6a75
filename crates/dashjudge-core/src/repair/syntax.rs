//! Textual repairs for JSON that does not parse. Every pass rewrites code segments
//! only, never the inside of a string literal.

use crate::extract::{segments, Segment};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([}\]])").unwrap();
    static ref STRUCTURAL_WS: Regex = Regex::new(r"\s*([\[\]{}:,])\s*").unwrap();
    static ref ADJACENT_OBJECTS: Regex = Regex::new(r"\}\{").unwrap();
    static ref ADJACENT_ARRAYS: Regex = Regex::new(r"\]\[").unwrap();
}

type Pass = (&'static str, fn(&str) -> String);

const PASSES: &[Pass] = &[
    ("removed trailing commas", remove_trailing_commas),
    ("normalized whitespace", normalize_whitespace),
    ("inserted missing commas", insert_missing_commas),
    ("re-indented layer list", reindent_layer_lists),
];

/// Applies every pass in order and returns the rewritten text plus the names of the
/// passes that changed something.
pub fn repair(text: &str) -> (String, Vec<String>) {
    let mut current = text.to_string();
    let mut applied = Vec::new();
    for (name, pass) in PASSES {
        let next = pass(&current);
        if next != current {
            applied.push((*name).to_string());
            current = next;
        }
    }
    (current, applied)
}

fn map_code(text: &str, f: impl Fn(&str) -> String) -> String {
    segments(text)
        .into_iter()
        .map(|seg| match seg {
            Segment::Code(code) => f(code),
            Segment::Literal(lit) => lit.to_string(),
        })
        .collect()
}

pub fn remove_trailing_commas(text: &str) -> String {
    map_code(text, |code| TRAILING_COMMA.replace_all(code, "$1").into_owned())
}

pub fn normalize_whitespace(text: &str) -> String {
    map_code(text, |code| STRUCTURAL_WS.replace_all(code, "$1").into_owned())
}

pub fn insert_missing_commas(text: &str) -> String {
    map_code(text, |code| {
        let code = ADJACENT_OBJECTS.replace_all(code, "},{");
        ADJACENT_ARRAYS.replace_all(&code, "],[").into_owned()
    })
}

/// Puts each element of a `"layers": [...]` list on its own line.
pub fn reindent_layer_lists(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut depth: i32 = 0;
    let mut list_depths: Vec<i32> = Vec::new();
    let mut after_layers_key = false;
    let mut saw_colon = false;

    for seg in segments(text) {
        match seg {
            Segment::Literal(lit) => {
                after_layers_key = lit == "\"layers\"";
                saw_colon = false;
                out.push_str(lit);
            }
            Segment::Code(code) => {
                for c in code.chars() {
                    match c {
                        ':' if after_layers_key => {
                            saw_colon = true;
                            out.push_str(": ");
                        }
                        '[' => {
                            depth += 1;
                            if after_layers_key && saw_colon {
                                list_depths.push(depth);
                                out.push_str("[\n");
                            } else {
                                out.push('[');
                            }
                            after_layers_key = false;
                        }
                        ']' => {
                            if list_depths.last() == Some(&depth) {
                                list_depths.pop();
                                trim_trailing_ws(&mut out);
                                out.push_str("\n]");
                            } else {
                                out.push(']');
                            }
                            depth -= 1;
                        }
                        '{' => {
                            depth += 1;
                            after_layers_key = false;
                            out.push('{');
                        }
                        '}' => {
                            depth -= 1;
                            out.push('}');
                        }
                        ',' if list_depths.last() == Some(&depth) => {
                            out.push_str(",\n");
                        }
                        c if c.is_whitespace() && list_depths.last() == Some(&depth) => {}
                        c if c.is_whitespace() && after_layers_key => {}
                        c => {
                            after_layers_key = false;
                            out.push(c);
                        }
                    }
                }
            }
        }
    }
    out
}

fn trim_trailing_ws(s: &mut String) {
    let keep = s.trim_end().len();
    s.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_commas_removed_outside_strings() {
        assert_eq!(
            remove_trailing_commas(r#"{"a": [1, 2, ], "b": ",}",}"#),
            r#"{"a": [1, 2], "b": ",}"}"#
        );
    }

    #[test]
    fn test_whitespace_normalized() {
        assert_eq!(
            normalize_whitespace("{ \"a\" :  [ 1 ,\n 2 ] }"),
            r#"{"a":[1,2]}"#
        );
    }

    #[test]
    fn test_missing_commas_inserted() {
        assert_eq!(
            insert_missing_commas(r#"[{"a":1}{"b":2}]"#),
            r#"[{"a":1},{"b":2}]"#
        );
        assert_eq!(insert_missing_commas("[[1][2]]"), "[[1],[2]]");
        assert_eq!(insert_missing_commas(r#"{"s":"}{"}"#), r#"{"s":"}{"}"#);
    }

    #[test]
    fn test_layer_list_reindented() {
        let got = reindent_layer_lists(r#"{"layers":[{"id":1},{"id":2}]}"#);
        assert_eq!(got, "{\"layers\": [\n{\"id\":1},\n{\"id\":2}\n]}");
        let v: serde_json::Value = serde_json::from_str(&got).unwrap();
        assert_eq!(v["layers"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_repair_pipeline_order() {
        let broken = "{\"tabs\": [ {\"maps\": [ {\"layers\": [ {\"id\": 1,} {\"id\": 2} ] } ] } ] }";
        let (fixed, applied) = repair(broken);
        let v: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["tabs"][0]["maps"][0]["layers"][1]["id"], 2);
        assert_eq!(
            applied,
            vec![
                "removed trailing commas",
                "normalized whitespace",
                "inserted missing commas",
                "re-indented layer list"
            ]
        );
    }
}
