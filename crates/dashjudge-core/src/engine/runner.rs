use crate::errors::{ProviderError, RunError};
use crate::extract::{extract, Extraction};
use crate::fingerprint::prompt_fingerprint;
use crate::judge::{self, parse_judge_response, DEFAULT_JUDGE_PROMPT_ID};
use crate::model::{
    ModelRef, NewResult, NewRun, PromptRole, PromptTemplate, RunStatus, TestCase, USER_PROMPT_VAR,
};
use crate::providers::llm::{ClientRegistry, Completion, CompletionRequest, LlmClient};
use crate::repair;
use crate::storage::store::Store;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Upper bound for a single completion call, on top of the client's own timeout.
    pub timeout: Duration,
    /// Extra attempts for retryable provider errors (timeouts, rate limits).
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Apply structural repair to generated documents before judging.
    pub auto_repair: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            auto_repair: false,
        }
    }
}

/// Judge prompt and model used when a run does not name its own.
#[derive(Debug, Clone, Default)]
pub struct JudgeDefaults {
    pub prompt_id: Option<String>,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt_id: String,
    /// `None` selects the latest stored version.
    pub prompt_version: Option<u32>,
    pub model_id: String,
    pub judge_prompt_id: Option<String>,
    pub judge_model_id: Option<String>,
}

struct Endpoint {
    model: ModelRef,
    client: Arc<dyn LlmClient>,
}

/// Everything a run needs, resolved once before the first test case.
struct RunContext {
    run_id: i64,
    generation: PromptTemplate,
    generator: Endpoint,
    judge_prompt: PromptTemplate,
    judge: Endpoint,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    clients: ClientRegistry,
    settings: RunSettings,
    judge: JudgeDefaults,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        clients: ClientRegistry,
        settings: RunSettings,
        judge: JudgeDefaults,
    ) -> Self {
        Self {
            store,
            clients,
            settings,
            judge,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates a pending run over the currently active test cases. Nothing is
    /// written when there are none.
    pub fn start_run(&self, req: &RunRequest) -> Result<i64, RunError> {
        let cases = self.store.list_active_test_cases()?;
        if cases.is_empty() {
            return Err(RunError::NoActiveTestCases);
        }

        // Resolution failures surface when the run executes, so the record still exists.
        let prompt = self.store.get_prompt(&req.prompt_id, req.prompt_version)?;
        let new_run = NewRun {
            prompt_id: req.prompt_id.clone(),
            prompt_version: prompt
                .as_ref()
                .map(|p| p.version)
                .or(req.prompt_version)
                .unwrap_or(0),
            prompt_sha256: prompt.as_ref().map(prompt_fingerprint),
            model_id: req.model_id.clone(),
            judge_prompt_id: req
                .judge_prompt_id
                .clone()
                .or_else(|| self.judge.prompt_id.clone()),
            judge_model_id: req
                .judge_model_id
                .clone()
                .or_else(|| self.judge.model_id.clone()),
        };
        let ids: Vec<i64> = cases.iter().map(|tc| tc.id).collect();
        let run_id = self.store.create_run(&new_run, &ids)?;

        tracing::info!(
            event = "run_created",
            run_id,
            total = ids.len(),
            prompt_id = %new_run.prompt_id,
            prompt_version = new_run.prompt_version,
            model_id = %new_run.model_id,
            "created evaluation run"
        );
        Ok(run_id)
    }

    /// Runs `execute` on its own task and returns immediately.
    pub fn spawn(&self, run_id: i64) -> JoinHandle<Result<RunStatus, RunError>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute(run_id).await })
    }

    /// Processes every selected test case of a pending run and returns the terminal
    /// status. Run-level failures are recorded on the run and reported as `Failed`.
    pub async fn execute(&self, run_id: i64) -> Result<RunStatus, RunError> {
        if !self.store.mark_running(run_id)? {
            let run = self
                .store
                .get_run(run_id)?
                .ok_or(RunError::RunNotFound(run_id))?;
            if run.status == RunStatus::Cancelled {
                tracing::info!(event = "run_cancelled", run_id, "run cancelled before start");
                return Ok(RunStatus::Cancelled);
            }
            return Err(RunError::NotPending {
                id: run_id,
                status: run.status.to_string(),
            });
        }
        tracing::info!(event = "run_started", run_id, "evaluation run started");

        match self.process(run_id).await {
            Ok(status) => Ok(status),
            Err(e) => {
                let msg = e.to_string();
                tracing::error!(event = "run_failed", run_id, error = %msg, "evaluation run failed");
                self.store
                    .finalize_run(run_id, RunStatus::Failed, Some(&msg))?;
                Ok(RunStatus::Failed)
            }
        }
    }

    async fn process(&self, run_id: i64) -> Result<RunStatus, RunError> {
        let ctx = self.resolve(run_id)?;
        let cases = self.store.run_test_cases(run_id)?;
        if cases.is_empty() {
            return Err(RunError::NoActiveTestCases);
        }

        let mut scores: Vec<Option<f64>> = Vec::with_capacity(cases.len());
        for tc in &cases {
            if self.store.is_cancel_requested(run_id)? {
                self.store.finalize_run(run_id, RunStatus::Cancelled, None)?;
                tracing::info!(
                    event = "run_cancelled",
                    run_id,
                    completed = scores.len(),
                    total = cases.len(),
                    "run cancelled"
                );
                return Ok(RunStatus::Cancelled);
            }

            let result = self.evaluate_case(&ctx, tc).await;
            self.store.insert_result(run_id, &result)?;
            scores.push(result.comparison_score);
            let average = average_valid(&scores);
            self.store
                .record_progress(run_id, scores.len() as u32, average)?;

            tracing::debug!(
                event = "test_case_done",
                run_id,
                test_case_id = tc.id,
                score = ?result.comparison_score,
                completed = scores.len(),
                "test case evaluated"
            );
        }

        if !self.store.finalize_run(run_id, RunStatus::Completed, None)? {
            tracing::warn!(event = "run_already_terminal", run_id, "run was finalized elsewhere");
        }
        tracing::info!(
            event = "run_completed",
            run_id,
            completed = scores.len(),
            average_score = ?average_valid(&scores),
            "evaluation run completed"
        );
        Ok(RunStatus::Completed)
    }

    fn resolve(&self, run_id: i64) -> Result<RunContext, RunError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or(RunError::RunNotFound(run_id))?;

        let version = (run.prompt_version > 0).then_some(run.prompt_version);
        let generation = self.load_prompt(&run.prompt_id, version, PromptRole::Generation)?;

        let judge_prompt = match run.judge_prompt_id.as_deref() {
            Some(id) => match self.store.get_prompt(id, None)? {
                Some(p) => check_role(p, PromptRole::Judge)?,
                None if id == DEFAULT_JUDGE_PROMPT_ID => judge::default_judge_template(),
                None => {
                    return Err(RunError::PromptNotFound {
                        id: id.to_string(),
                        version: "latest".into(),
                    })
                }
            },
            None => judge::default_judge_template(),
        };

        let judge_model_id = run
            .judge_model_id
            .as_deref()
            .ok_or(RunError::JudgeNotConfigured("model"))?;

        Ok(RunContext {
            run_id,
            generation,
            generator: self.endpoint(&run.model_id)?,
            judge_prompt,
            judge: self.endpoint(judge_model_id)?,
        })
    }

    fn load_prompt(
        &self,
        id: &str,
        version: Option<u32>,
        role: PromptRole,
    ) -> Result<PromptTemplate, RunError> {
        let prompt = self
            .store
            .get_prompt(id, version)?
            .ok_or_else(|| RunError::PromptNotFound {
                id: id.to_string(),
                version: version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
            })?;
        check_role(prompt, role)
    }

    fn endpoint(&self, model_id: &str) -> Result<Endpoint, RunError> {
        let (model, client) = self
            .clients
            .resolve(model_id)
            .ok_or_else(|| RunError::ModelNotFound(model_id.to_string()))?;
        Ok(Endpoint {
            model: model.clone(),
            client: Arc::clone(client),
        })
    }

    /// Never fails: every problem becomes a result without a valid score.
    async fn evaluate_case(&self, ctx: &RunContext, tc: &TestCase) -> NewResult {
        let started = Instant::now();
        let elapsed = |started: Instant| Some(started.elapsed().as_millis() as u64);

        let prompt = ctx
            .generation
            .render(&[(USER_PROMPT_VAR, tc.user_prompt.as_str())]);
        let generated = match self.call(ctx, &ctx.generator, &prompt, tc.id, "generation").await {
            Ok(c) => c,
            Err(e) => {
                return NewResult {
                    latency_ms: elapsed(started),
                    ..NewResult::sentinel(
                        tc.id,
                        format!("generation failed ({}): {}", e.kind(), e),
                    )
                }
            }
        };

        let mut document = match extract(&generated.content) {
            Extraction::Parsed(v) => v,
            Extraction::Unparsed { error, .. } => {
                tracing::warn!(
                    event = "extraction_failed",
                    run_id = ctx.run_id,
                    test_case_id = tc.id,
                    error = %error,
                    "generated output is not JSON"
                );
                return NewResult {
                    latency_ms: elapsed(started),
                    tokens_used: generated.tokens_used,
                    ..NewResult::sentinel(
                        tc.id,
                        format!("could not parse generated output as JSON: {}", error),
                    )
                };
            }
        };

        let repair_fixes = if self.settings.auto_repair {
            repair::repair_value(&mut document).fixes
        } else {
            Vec::new()
        };

        let judge_prompt =
            judge::render_judge_prompt(&ctx.judge_prompt, &tc.user_prompt, &tc.expected_json, &document);
        let judged = self.call(ctx, &ctx.judge, &judge_prompt, tc.id, "judge").await;

        let base = NewResult {
            test_case_id: tc.id,
            generated_json: Some(document),
            judge_model_id: Some(ctx.judge.model.id.clone()),
            repair_fixes,
            ..Default::default()
        };
        match judged {
            Ok(judged) => {
                let verdict = parse_judge_response(&judged.content);
                if verdict.score.is_none() {
                    tracing::warn!(
                        event = "judge_unparsed",
                        run_id = ctx.run_id,
                        test_case_id = tc.id,
                        "no valid score in judge response"
                    );
                }
                NewResult {
                    comparison_score: verdict.score,
                    comparison_details: verdict.rationale,
                    raw_judge_response: Some(judged.content),
                    latency_ms: elapsed(started),
                    tokens_used: sum_tokens(generated.tokens_used, judged.tokens_used),
                    ..base
                }
            }
            Err(e) => NewResult {
                comparison_details: format!("judge failed ({}): {}", e.kind(), e),
                latency_ms: elapsed(started),
                tokens_used: generated.tokens_used,
                ..base
            },
        }
    }

    async fn call(
        &self,
        ctx: &RunContext,
        endpoint: &Endpoint,
        prompt: &str,
        test_case_id: i64,
        stage: &'static str,
    ) -> Result<Completion, ProviderError> {
        let max_attempts = 1 + self.settings.max_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = CompletionRequest {
                prompt,
                model: &endpoint.model,
                image_ref: None,
            };
            let outcome = match timeout(self.settings.timeout, endpoint.client.complete(&req)).await
            {
                Ok(r) => r,
                Err(_) => Err(ProviderError::Timeout(self.settings.timeout)),
            };

            let err = match outcome {
                Ok(c) => return Ok(c),
                Err(e) => e,
            };
            tracing::warn!(
                event = "provider_error",
                run_id = ctx.run_id,
                test_case_id,
                stage,
                provider = endpoint.client.provider_name(),
                model_id = %endpoint.model.id,
                kind = err.kind(),
                attempt,
                error = %err,
                "completion call failed"
            );
            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }
            let backoff = match &err {
                ProviderError::RateLimited {
                    retry_after: Some(d),
                } => *d,
                _ => self.settings.retry_backoff * attempt,
            };
            tokio::time::sleep(backoff).await;
        }
    }
}

fn check_role(prompt: PromptTemplate, expected: PromptRole) -> Result<PromptTemplate, RunError> {
    if prompt.role != expected {
        return Err(RunError::PromptRoleMismatch {
            id: prompt.id,
            actual: prompt.role.as_str(),
            expected: expected.as_str(),
        });
    }
    Ok(prompt)
}

fn sum_tokens(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    [a, b].into_iter().flatten().reduce(u32::saturating_add)
}

/// Mean over valid scores only; `None` until at least one exists.
pub fn average_valid(scores: &[Option<f64>]) -> Option<f64> {
    let valid: Vec<f64> = scores.iter().flatten().copied().collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_skips_missing_scores() {
        assert_eq!(average_valid(&[Some(8.0), None, Some(6.0)]), Some(7.0));
        assert_eq!(average_valid(&[None, None]), None);
        assert_eq!(average_valid(&[]), None);
    }

    #[test]
    fn test_sum_tokens() {
        assert_eq!(sum_tokens(None, None), None);
        assert_eq!(sum_tokens(Some(3), None), Some(3));
        assert_eq!(sum_tokens(Some(3), Some(4)), Some(7));
    }
}
