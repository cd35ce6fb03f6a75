//! Structural and vocabulary repair of a parsed dashboard document.
//!
//! Document shape: `{"tabs": [{"maps": [{"layers": [layer, ...]}]}]}`.

use super::vocabulary::{self as vocab, OPTIONS_KEY};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairOutcome {
    pub fixes: Vec<String>,
    pub warnings: Vec<String>,
}

impl RepairOutcome {
    pub fn changed(&self) -> bool {
        !self.fixes.is_empty()
    }
}

/// Walks tabs, maps and layers, repairing every layer in place. Missing containers
/// and missing layer identity fields are reported as warnings only.
pub fn repair_document(doc: &mut Value, out: &mut RepairOutcome) {
    let Some(root) = doc.as_object_mut() else {
        out.warnings
            .push("document root is not an object".to_string());
        return;
    };
    let Some(tabs) = root.get_mut("tabs").and_then(Value::as_array_mut) else {
        out.warnings
            .push("document has no 'tabs' array".to_string());
        return;
    };

    for (ti, tab) in tabs.iter_mut().enumerate() {
        let Some(maps) = tab.get_mut("maps").and_then(Value::as_array_mut) else {
            out.warnings
                .push(format!("tabs[{}] has no 'maps' array", ti));
            continue;
        };
        for (mi, map) in maps.iter_mut().enumerate() {
            let Some(layers) = map.get_mut("layers").and_then(Value::as_array_mut) else {
                out.warnings
                    .push(format!("tabs[{}].maps[{}] has no 'layers' array", ti, mi));
                continue;
            };
            for (li, layer) in layers.iter_mut().enumerate() {
                let path = format!("tabs[{}].maps[{}].layers[{}]", ti, mi, li);
                repair_layer(&path, layer, out);
            }
        }
    }
}

pub fn repair_layer(path: &str, layer: &mut Value, out: &mut RepairOutcome) {
    let Some(obj) = layer.as_object_mut() else {
        out.warnings.push(format!("{}: layer is not an object", path));
        return;
    };

    for field in ["id", "index", "kind"] {
        if !obj.contains_key(field) {
            out.warnings.push(format!("{}: missing '{}'", path, field));
        }
    }

    fix_kind(path, obj, out);
    fix_enum_field(path, obj, "model", vocab::VALID_MODELS, vocab::DEFAULT_MODEL, out);
    fix_enum_field(
        path,
        obj,
        "color_map",
        vocab::VALID_COLOR_MAPS,
        vocab::DEFAULT_COLOR_MAP,
        out,
    );

    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if kind == vocab::BACKGROUND_MAP_KIND {
        fix_enum_field(
            path,
            obj,
            "style",
            vocab::VALID_BACKGROUND_STYLES,
            vocab::DEFAULT_BACKGROUND_STYLE,
            out,
        );
    }

    relocate_options(path, &kind, obj, out);
}

fn fix_kind(path: &str, obj: &mut Map<String, Value>, out: &mut RepairOutcome) {
    let Some(kind) = obj.get("kind").and_then(Value::as_str) else {
        return;
    };
    if vocab::is_canonical_kind(kind) {
        return;
    }

    if let Some(canonical) = vocab::alias_target(kind) {
        out.fixes
            .push(format!("{}: kind '{}' -> '{}'", path, kind, canonical));
        obj.insert("kind".into(), Value::String(canonical.into()));
    } else if let Some(hint) = vocab::suggest_kind(kind) {
        out.warnings.push(format!(
            "{}: unknown kind '{}' (did you mean '{}'?)",
            path, kind, hint
        ));
    } else {
        out.warnings
            .push(format!("{}: unknown kind '{}'", path, kind));
    }
}

/// Replaces a present but non-whitelisted value with `default`. Absent fields stay absent.
fn fix_enum_field(
    path: &str,
    obj: &mut Map<String, Value>,
    field: &str,
    valid: &[&str],
    default: &str,
    out: &mut RepairOutcome,
) {
    let Some(current) = obj.get(field) else {
        return;
    };
    if current.as_str().is_some_and(|s| valid.contains(&s)) {
        return;
    }

    out.fixes
        .push(format!("{}: {} {} -> '{}'", path, field, current, default));
    obj.insert(field.to_string(), Value::String(default.to_string()));
}

fn relocate_options(
    path: &str,
    kind: &str,
    obj: &mut Map<String, Value>,
    out: &mut RepairOutcome,
) {
    let keys = vocab::relocations_for(kind);
    if keys.is_empty() {
        return;
    }
    let occupied: Vec<bool> = keys.iter().map(|(_, to)| obj.contains_key(*to)).collect();

    let (moved, now_empty) = {
        let Some(Value::Object(options)) = obj.get_mut(OPTIONS_KEY) else {
            return;
        };
        let mut moved = Vec::new();
        for ((from, to), taken) in keys.iter().zip(occupied) {
            if !options.contains_key(*from) {
                continue;
            }
            if taken {
                out.warnings.push(format!(
                    "{}: '{}.{}' left in place, '{}' already set on layer",
                    path, OPTIONS_KEY, from, to
                ));
                continue;
            }
            if let Some(v) = options.remove(*from) {
                moved.push((*from, *to, v));
            }
        }
        (moved, options.is_empty())
    };

    if moved.is_empty() {
        return;
    }
    for (from, to, v) in moved {
        out.fixes.push(if from == to {
            format!("{}: moved '{}.{}' to layer", path, OPTIONS_KEY, from)
        } else {
            format!("{}: moved '{}.{}' to '{}'", path, OPTIONS_KEY, from, to)
        });
        obj.insert(to.to_string(), v);
    }
    if now_empty {
        obj.remove(OPTIONS_KEY);
        out.fixes
            .push(format!("{}: removed empty '{}'", path, OPTIONS_KEY));
    }
}
