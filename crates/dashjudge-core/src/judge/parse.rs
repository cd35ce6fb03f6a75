//! Extracts `(score, rationale)` from free-form judge output.
//!
//! Judges answer in several formats depending on model and prompt vintage. The
//! strategies below are tried in order and the first one that yields both a number
//! and a non-empty rationale wins.

use crate::extract::{self, balanced_fragment, Extraction};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;
pub const EXCERPT_CHARS: usize = 500;
pub const UNPARSED_PREFIX: &str = "Could not determine a score from the judge response. Excerpt: ";

lazy_static! {
    static ref TAG_SCORE: Regex =
        Regex::new(r"(?is)<score>\s*(-?\d+(?:\.\d+)?)\s*</score>").unwrap();
    static ref TAG_DETAILS: Regex = Regex::new(r"(?is)<details>\s*(.*?)\s*</details>").unwrap();
    static ref LABEL_SCORE: Regex =
        Regex::new(r"(?im)^[ \t]*SCORE[ \t]*:[ \t]*(-?\d+(?:\.\d+)?)").unwrap();
    static ref LABEL_DETAILS: Regex =
        Regex::new(r"(?ims)^[ \t]*DETAILS[ \t]*:[ \t]*(.*?)(?:\r?\n[ \t]*\r?\n|\z)").unwrap();
    static ref LOOSE_SCORE: Regex =
        Regex::new(r#"(?i)"?\b(?:similarity_score|score)"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#)
            .unwrap();
    static ref LOOSE_DETAILS: Regex =
        Regex::new(r#"(?i)"?\b(?:details|explanation)"?\s*[:=]\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeVerdict {
    /// `None` means no valid score could be determined.
    pub score: Option<f64>,
    pub rationale: String,
    /// Name of the strategy that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<&'static str>,
}

type Strategy = fn(&str) -> Option<(f64, String)>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("tagged", tagged),
    ("labeled", labeled),
    ("json", embedded_json),
    ("loose", loose),
];

pub fn parse_judge_response(text: &str) -> JudgeVerdict {
    let hit = STRATEGIES.iter().find_map(|(name, strategy)| {
        strategy(text)
            .filter(|(_, rationale)| !rationale.trim().is_empty())
            .map(|(score, rationale)| (*name, score, rationale))
    });

    let Some((name, score, rationale)) = hit else {
        return JudgeVerdict {
            score: None,
            rationale: format!("{}{}", UNPARSED_PREFIX, excerpt(text)),
            strategy: None,
        };
    };

    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return JudgeVerdict {
            score: None,
            rationale: format!(
                "Judge returned out-of-range score {} (expected {}-{}). Judge details: {}",
                score,
                MIN_SCORE,
                MAX_SCORE,
                rationale.trim()
            ),
            strategy: Some(name),
        };
    }

    JudgeVerdict {
        score: Some(score),
        rationale: rationale.trim().to_string(),
        strategy: Some(name),
    }
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().nth(EXCERPT_CHARS).is_some() {
        out.push_str("...");
    }
    out
}

fn tagged(text: &str) -> Option<(f64, String)> {
    let score = TAG_SCORE.captures(text)?.get(1)?.as_str().parse().ok()?;
    let details = TAG_DETAILS.captures(text)?.get(1)?.as_str();
    Some((score, details.to_string()))
}

fn labeled(text: &str) -> Option<(f64, String)> {
    let caps = LABEL_SCORE.captures(text)?;
    let score = caps.get(1)?.as_str().parse().ok()?;
    let rest = &text[caps.get(0)?.end()..];
    let details = LABEL_DETAILS.captures(rest)?.get(1)?.as_str();
    Some((score, details.to_string()))
}

fn embedded_json(text: &str) -> Option<(f64, String)> {
    json_candidates(text).iter().find_map(json_shape)
}

fn json_candidates(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    if let Extraction::Parsed(v) = extract::extract(text) {
        out.push(v);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(v) = balanced_fragment(text, open, close)
            .and_then(|frag| serde_json::from_str::<Value>(frag).ok())
        {
            out.push(v);
        }
    }
    out
}

/// Accepted shapes, in order: `{score, details}`, `{similarity_score, explanation}`,
/// `[{evaluation: {score, details}}, ..]`, `{evaluation: {score, details}}`.
fn json_shape(v: &Value) -> Option<(f64, String)> {
    field_pair(v, "score", "details")
        .or_else(|| field_pair(v, "similarity_score", "explanation"))
        .or_else(|| {
            v.as_array()
                .and_then(|items| items.first())
                .and_then(|first| first.get("evaluation"))
                .and_then(|e| field_pair(e, "score", "details"))
        })
        .or_else(|| {
            v.get("evaluation")
                .and_then(|e| field_pair(e, "score", "details"))
        })
}

fn field_pair(v: &Value, score_key: &str, details_key: &str) -> Option<(f64, String)> {
    let score = as_number(v.get(score_key)?)?;
    let details = v.get(details_key)?.as_str()?;
    Some((score, details.to_string()))
}

fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn loose(text: &str) -> Option<(f64, String)> {
    let score = LOOSE_SCORE.captures(text)?.get(1)?.as_str().parse().ok()?;
    let raw = LOOSE_DETAILS.captures(text)?.get(1)?.as_str();
    let details = serde_json::from_str::<String>(&format!("\"{}\"", raw))
        .unwrap_or_else(|_| raw.to_string());
    Some((score, details))
}
