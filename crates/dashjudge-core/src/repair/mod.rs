//! Validation and repair of generated dashboard documents.
//!
//! Two phases: textual repair when the input does not parse ([`syntax`]), then
//! structural and vocabulary repair of the parsed document ([`structure`]). Only
//! unparseable syntax is a hard error; structural problems are warnings.

pub mod structure;
pub mod syntax;
pub mod vocabulary;

use crate::extract;
use serde::Serialize;
use serde_json::{json, Value};

pub use structure::RepairOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Run the textual repair passes when the input does not parse.
    pub auto_fix: bool,
    /// Walk tabs/maps/layers and repair layers against the domain vocabulary.
    pub require_domain_structure: bool,
    /// Treat warnings as errors.
    pub strict: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            auto_fix: true,
            require_domain_structure: true,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// Pretty-printed repaired document; `None` when the input could not be parsed.
    pub fixed_text: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub was_fixed: bool,
    pub fixes: Vec<String>,
}

pub fn validate(json_text: &str, opts: &ValidateOptions) -> ValidationReport {
    let (mut report, value) = parse_phase(json_text, opts);
    if let Some(mut value) = value {
        if opts.require_domain_structure {
            let mut out = RepairOutcome::default();
            structure::repair_document(&mut value, &mut out);
            absorb(&mut report, out);
        }
        finish(&mut report, &value, opts);
    }
    report
}

/// Validates a bare layer array. The text is parsed as given, so syntax errors point
/// into the caller's input; structural repair treats the array as a single layer list.
pub fn validate_layers(json_text: &str, opts: &ValidateOptions) -> ValidationReport {
    let (mut report, value) = parse_phase(json_text, opts);
    let Some(mut value) = value else {
        return report;
    };
    if !value.is_array() {
        report
            .errors
            .push("expected a JSON array of layers".to_string());
        report.was_fixed = !report.fixes.is_empty();
        return report;
    }
    if opts.require_domain_structure {
        absorb(&mut report, repair_value(&mut value));
    }
    finish(&mut report, &value, opts);
    report
}

const LAYERS_PATH: &str = "tabs[0].maps[0].layers";

/// Phase-2 repair of an already parsed value. Arrays are treated as layer lists.
pub fn repair_value(value: &mut Value) -> RepairOutcome {
    let mut out = RepairOutcome::default();
    if value.is_array() {
        let mut doc = json!({"tabs": [{"maps": [{"layers": value.take()}]}]});
        structure::repair_document(&mut doc, &mut out);
        if let Some(layers) = doc.pointer_mut("/tabs/0/maps/0/layers") {
            *value = layers.take();
        }
        for msg in out.fixes.iter_mut().chain(out.warnings.iter_mut()) {
            *msg = msg.replace(LAYERS_PATH, "layers");
        }
    } else {
        structure::repair_document(value, &mut out);
    }
    out
}

/// Cleaning and, when allowed, textual repair until the text parses.
fn parse_phase(json_text: &str, opts: &ValidateOptions) -> (ValidationReport, Option<Value>) {
    let mut report = ValidationReport::default();
    let (cleaned, steps) = extract::clean_with_steps(json_text);
    if steps.bom {
        report.fixes.push("stripped byte order mark".to_string());
    }
    if steps.fence {
        report.fixes.push("stripped markdown fence".to_string());
    }

    let value = match serde_json::from_str::<Value>(cleaned) {
        Ok(v) => v,
        Err(e) if !opts.auto_fix => {
            report.errors.push(format!("invalid JSON: {}", e));
            return (report, None);
        }
        Err(_) => {
            let (repaired, applied) = syntax::repair(cleaned);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(v) => {
                    report.fixes.extend(applied);
                    v
                }
                Err(e) => {
                    report.fixes.clear();
                    report
                        .errors
                        .push(format!("invalid JSON after syntax repair: {}", e));
                    return (report, None);
                }
            }
        }
    };
    (report, Some(value))
}

fn absorb(report: &mut ValidationReport, out: RepairOutcome) {
    report.fixes.extend(out.fixes);
    report.warnings.extend(out.warnings);
}

fn finish(report: &mut ValidationReport, value: &Value, opts: &ValidateOptions) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => report.fixed_text = Some(text),
        Err(e) => report.errors.push(format!("failed to serialize document: {}", e)),
    }
    if opts.strict {
        report.errors.append(&mut report.warnings);
    }
    report.was_fixed = !report.fixes.is_empty();
    report.is_valid = report.errors.is_empty();
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = r#"```json
{"tabs": [ {"maps": [ {"layers": [
  {"id": "a", "index": 0, "kind": "IsolineLayerDescription", "model": "not-a-real-model",},
  {"id": "b", "index": 1, "kind": "BackgroundMapDescription", "style": "neon"}
] } ] } ] }
```"#;

    #[test]
    fn test_broken_document_repaired() {
        let report = validate(BROKEN, &ValidateOptions::default());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.was_fixed);

        let v: Value = serde_json::from_str(report.fixed_text.as_deref().unwrap()).unwrap();
        let layers = &v["tabs"][0]["maps"][0]["layers"];
        assert_eq!(layers[0]["kind"], "ContourLayerDescription");
        assert_eq!(layers[0]["model"], vocabulary::DEFAULT_MODEL);
        assert_eq!(layers[1]["style"], vocabulary::DEFAULT_BACKGROUND_STYLE);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let first = validate(BROKEN, &ValidateOptions::default());
        let fixed = first.fixed_text.unwrap();

        let second = validate(&fixed, &ValidateOptions::default());
        assert!(second.is_valid);
        assert!(!second.was_fixed, "{:?}", second.fixes);
        assert_eq!(second.fixed_text.as_deref(), Some(fixed.as_str()));
    }

    #[test]
    fn test_unrecoverable_syntax_has_no_output() {
        let report = validate(r#"{"tabs": [ {"maps": "#, &ValidateOptions::default());
        assert!(!report.is_valid);
        assert!(report.fixed_text.is_none());
        assert_eq!(report.errors.len(), 1);
        assert!(!report.was_fixed);
    }

    #[test]
    fn test_no_autofix_reports_parse_error() {
        let opts = ValidateOptions {
            auto_fix: false,
            ..Default::default()
        };
        let report = validate(r#"{"tabs": [],}"#, &opts);
        assert!(!report.is_valid);
        assert!(report.errors[0].starts_with("invalid JSON"));
    }

    #[test]
    fn test_warnings_do_not_fail_unless_strict() {
        let text = r#"{"title": "no tabs"}"#;
        let lenient = validate(text, &ValidateOptions::default());
        assert!(lenient.is_valid);
        assert_eq!(lenient.warnings, vec!["document has no 'tabs' array"]);

        let strict = validate(
            text,
            &ValidateOptions {
                strict: true,
                ..Default::default()
            },
        );
        assert!(!strict.is_valid);
        assert!(strict.warnings.is_empty());
        assert_eq!(strict.errors, vec!["document has no 'tabs' array"]);
        assert!(strict.fixed_text.is_some());
    }

    #[test]
    fn test_layers_variant_unwraps() {
        let report = validate_layers(
            r#"[{"id": "a", "index": 0, "kind": "LabelLayerDescription", "options": {"text_size": 14}},]"#,
            &ValidateOptions::default(),
        );
        assert!(report.is_valid, "{:?}", report.errors);
        let v: Value = serde_json::from_str(report.fixed_text.as_deref().unwrap()).unwrap();
        assert_eq!(
            v,
            json!([{"id": "a", "index": 0, "kind": "TextLayerDescription", "text_size": 14}])
        );
        assert!(report.fixes.iter().all(|f| !f.contains("tabs[0]")));
    }

    #[test]
    fn test_layers_syntax_error_points_into_input() {
        let opts = ValidateOptions {
            auto_fix: false,
            ..Default::default()
        };
        let input = r#"[{"a": 1},]"#;
        let report = validate_layers(input, &opts);
        assert!(!report.is_valid);
        let column: usize = report.errors[0]
            .rsplit("column ")
            .next()
            .and_then(|c| c.parse().ok())
            .unwrap();
        assert!(column <= input.len(), "{}", report.errors[0]);
    }

    #[test]
    fn test_layers_rejects_non_array() {
        let report = validate_layers(r#"{"id": "a"}"#, &ValidateOptions::default());
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["expected a JSON array of layers"]);
        assert!(report.warnings.is_empty());
        assert!(report.fixed_text.is_none());
    }

    #[test]
    fn test_bom_is_reported_as_its_own_fix() {
        let report = validate("\u{feff}{\"tabs\": []}", &ValidateOptions::default());
        assert!(report.is_valid);
        assert_eq!(report.fixes, vec!["stripped byte order mark"]);
    }

    #[test]
    fn test_repair_value_on_array() {
        let mut v = json!([{"id": 1, "index": 0, "kind": "RasterDescription", "color_map": "rainbow"}]);
        let out = repair_value(&mut v);
        assert_eq!(out.fixes.len(), 2);
        assert_eq!(v[0]["kind"], "RasterLayerDescription");
        assert_eq!(v[0]["color_map"], vocabulary::DEFAULT_COLOR_MAP);
        assert!(out.fixes[0].starts_with("layers[0]"));
    }
}
