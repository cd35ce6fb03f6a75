use crate::engine::{JudgeDefaults, RunSettings};
use crate::errors::ConfigError;
use crate::judge::{default_judge_template, DEFAULT_JUDGE_PROMPT_ID};
use crate::model::{ModelRef, PromptRole, PromptTemplate};
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "dashjudge.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub version: u32,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub prompts: Vec<PromptConfig>,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub test_cases: Vec<TestCaseConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Fake,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Fake => "fake",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-model HTTP timeout; falls back to `settings.timeout_seconds`.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Scripted answers for the `fake` provider. The last one repeats.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
}

impl ModelConfig {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            id: self.id.clone(),
            provider: self.provider.as_str().to_string(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    pub id: String,
    #[serde(default = "default_prompt_version")]
    pub version: u32,
    pub role: PromptRole,
    pub template: String,
}

impl PromptConfig {
    pub fn to_template(&self) -> PromptTemplate {
        PromptTemplate {
            id: self.id.clone(),
            version: self.version,
            role: self.role,
            template: self.template.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JudgeConfig {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub auto_repair: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            auto_repair: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Settings {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            timeout: Duration::from_secs(self.timeout_seconds),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            auto_repair: self.auto_repair,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseConfig {
    pub key: String,
    pub user_prompt: String,
    /// Either an inline YAML/JSON structure or a string holding JSON text.
    pub expected_json: serde_json::Value,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_prompt_version() -> u32 {
    1
}
fn default_timeout_seconds() -> u64 {
    120
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub prompts: usize,
    pub test_cases: usize,
    pub inactive: usize,
}

impl ProjectConfig {
    pub fn judge_defaults(&self) -> JudgeDefaults {
        JudgeDefaults {
            prompt_id: self.judge.prompt.clone(),
            model_id: self.judge.model.clone(),
        }
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Upserts prompts and test cases into the store. The built-in judge template is
    /// stored too unless the config defines a prompt with the same id.
    pub fn import_into(&self, store: &Store) -> anyhow::Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for p in &self.prompts {
            store.upsert_prompt(&p.to_template())?;
            summary.prompts += 1;
        }
        if !self.prompts.iter().any(|p| p.id == DEFAULT_JUDGE_PROMPT_ID) {
            store.upsert_prompt(&default_judge_template())?;
        }
        for tc in &self.test_cases {
            store.upsert_test_case(Some(&tc.key), &tc.user_prompt, &tc.expected_json, tc.active)?;
            summary.test_cases += 1;
            if !tc.active {
                summary.inactive += 1;
            }
        }
        tracing::info!(
            event = "config_imported",
            prompts = summary.prompts,
            test_cases = summary.test_cases,
            inactive = summary.inactive,
            "imported config"
        );
        Ok(summary)
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<ProjectConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<ProjectConfig, ConfigError> {
    let mut ignored_keys = BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);
    let mut cfg: ProjectConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let meaningful: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields in strict mode: {:?}",
                meaningful
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?meaningful, "ignored unknown config fields");
    }

    normalize_expected(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Parses `expected_json` values given as JSON text.
fn normalize_expected(cfg: &mut ProjectConfig) -> Result<(), ConfigError> {
    for tc in &mut cfg.test_cases {
        if let serde_json::Value::String(text) = &tc.expected_json {
            tc.expected_json = serde_json::from_str(text).map_err(|e| {
                ConfigError(format!(
                    "test case '{}': expected_json is not valid JSON: {}",
                    tc.key, e
                ))
            })?;
        }
    }
    Ok(())
}

pub fn validate(cfg: &ProjectConfig) -> Result<(), ConfigError> {
    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.settings.timeout_seconds == 0 {
        return Err(ConfigError("settings.timeout_seconds must be > 0".into()));
    }

    let mut seen = HashSet::new();
    for m in &cfg.models {
        if !seen.insert(m.id.as_str()) {
            return Err(ConfigError(format!("duplicate model id '{}'", m.id)));
        }
    }

    let mut seen = HashSet::new();
    for p in &cfg.prompts {
        if !seen.insert((p.id.as_str(), p.version)) {
            return Err(ConfigError(format!(
                "duplicate prompt '{}' version {}",
                p.id, p.version
            )));
        }
        let missing = p.to_template().missing_vars();
        if !missing.is_empty() {
            return Err(ConfigError(format!(
                "prompt '{}' ({}) is missing placeholders: {}",
                p.id,
                p.role.as_str(),
                missing
                    .iter()
                    .map(|v| format!("{{{{{}}}}}", v))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    }

    let mut seen = HashSet::new();
    for tc in &cfg.test_cases {
        if !seen.insert(tc.key.as_str()) {
            return Err(ConfigError(format!("duplicate test case key '{}'", tc.key)));
        }
    }

    if let Some(id) = cfg.judge.prompt.as_deref() {
        let known = id == DEFAULT_JUDGE_PROMPT_ID
            || cfg
                .prompts
                .iter()
                .any(|p| p.id == id && p.role == PromptRole::Judge);
        if !known {
            return Err(ConfigError(format!(
                "judge.prompt '{}' is not a configured judge prompt",
                id
            )));
        }
    }
    if let Some(id) = cfg.judge.model.as_deref() {
        if cfg.model(id).is_none() {
            return Err(ConfigError(format!(
                "judge.model '{}' is not a configured model",
                id
            )));
        }
    }
    Ok(())
}

pub const SAMPLE_CONFIG: &str = r#"version: 1

models:
  - id: gpt-4o-mini
    provider: openai
    model: gpt-4o-mini
    temperature: 0.2
    max_tokens: 4096
    api_key_env: OPENAI_API_KEY
  # Offline pair for trying the pipeline without network access.
  - id: offline-generator
    provider: fake
    model: fake
    responses:
      - '{"tabs": [{"title": "Europe", "maps": [{"layers": [{"id": "bg", "index": 0, "kind": "BackgroundMapDescription", "style": "light"}, {"id": "t2m", "index": 1, "kind": "IsolineLayerDescription", "model": "ecmwf_ifs025", "options": {"line_width": 2}}]}]}]}'
  - id: offline-judge
    provider: fake
    model: fake
    responses:
      - "<score>8</score><details>Same background and model; contour layer instead of raster.</details>"

prompts:
  - id: dashboard-generator
    version: 1
    role: generation
    template: |
      You build weather dashboard configurations.
      Answer with a single JSON document shaped like
      {"tabs": [{"maps": [{"layers": [...]}]}]} and nothing else.

      Request: {{user_prompt}}

judge:
  prompt: judge-default
  model: offline-judge

settings:
  timeout_seconds: 120
  max_retries: 1
  retry_backoff_ms: 500
  auto_repair: true
  poll_interval_ms: 250

test_cases:
  - key: europe-temperature
    user_prompt: "Show 2m temperature over Europe on a light background."
    expected_json:
      tabs:
        - title: Europe
          maps:
            - layers:
                - { id: bg, index: 0, kind: BackgroundMapDescription, style: light }
                - { id: t2m, index: 1, kind: RasterLayerDescription, model: ecmwf_ifs025, color_map: temperature }
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))
}
