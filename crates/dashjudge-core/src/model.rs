use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(\w+)\}\}").unwrap();
}

/// A (prompt, reference document) pair used as ground truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub user_prompt: String,
    pub expected_json: serde_json::Value,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Failed, // unknown rows are never resumed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRun {
    pub id: i64,
    pub prompt_id: String,
    pub prompt_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_sha256: Option<String>,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model_id: Option<String>,
    pub total_test_cases: u32,
    pub completed_test_cases: u32,
    pub average_score: Option<f64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Persisted outcome of one test case within one run. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub id: i64,
    pub run_id: i64,
    pub test_case_id: i64,
    pub generated_json: Option<serde_json::Value>,
    /// `None` when no valid score could be determined.
    pub comparison_score: Option<f64>,
    pub comparison_details: String,
    pub judge_model_id: Option<String>,
    pub raw_judge_response: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repair_fixes: Vec<String>,
    pub created_at: String,
}

/// Insert shape for [`EvaluationResult`]; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewResult {
    pub test_case_id: i64,
    pub generated_json: Option<serde_json::Value>,
    pub comparison_score: Option<f64>,
    pub comparison_details: String,
    pub judge_model_id: Option<String>,
    pub raw_judge_response: Option<String>,
    pub latency_ms: Option<u64>,
    pub tokens_used: Option<u32>,
    pub repair_fixes: Vec<String>,
}

impl NewResult {
    /// A result that carries no valid score.
    pub fn sentinel(test_case_id: i64, details: impl Into<String>) -> Self {
        Self {
            test_case_id,
            comparison_details: details.into(),
            ..Default::default()
        }
    }
}

/// Insert shape for [`EvaluationRun`]. A run always starts `pending`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRun {
    pub prompt_id: String,
    /// 0 when the prompt could not be resolved at creation time.
    pub prompt_version: u32,
    pub prompt_sha256: Option<String>,
    pub model_id: String,
    pub judge_prompt_id: Option<String>,
    pub judge_model_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    #[serde(flatten)]
    pub run: EvaluationRun,
    pub results: Vec<EvaluationResult>,
}

impl RunSummary {
    pub fn valid_score_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.comparison_score.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    Generation,
    Judge,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::Generation => "generation",
            PromptRole::Judge => "judge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generation" => Some(PromptRole::Generation),
            "judge" => Some(PromptRole::Judge),
            _ => None,
        }
    }
}

pub const USER_PROMPT_VAR: &str = "user_prompt";
pub const EXPECTED_JSON_VAR: &str = "expected_json";
pub const GENERATED_JSON_VAR: &str = "generated_json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub id: String,
    pub version: u32,
    pub role: PromptRole,
    pub template: String,
}

impl PromptTemplate {
    /// Placeholders every template of this role must contain.
    pub fn required_vars(role: PromptRole) -> &'static [&'static str] {
        match role {
            PromptRole::Generation => &[USER_PROMPT_VAR],
            PromptRole::Judge => &[USER_PROMPT_VAR, EXPECTED_JSON_VAR, GENERATED_JSON_VAR],
        }
    }

    pub fn missing_vars(&self) -> Vec<&'static str> {
        Self::required_vars(self.role)
            .iter()
            .copied()
            .filter(|var| !self.template.contains(&format!("{{{{{}}}}}", var)))
            .collect()
    }

    /// Substitutes `{{name}}` placeholders in one pass over the template, so values
    /// are never scanned for placeholders themselves. Unknown placeholders are left as is.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures| {
                vars.iter()
                    .find(|(name, _)| *name == &caps[1])
                    .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
            })
            .into_owned()
    }
}

/// Resolved model selection handed to a provider with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRef {
    pub id: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}
