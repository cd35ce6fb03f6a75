use async_trait::async_trait;
use dashjudge_core::engine::{JudgeDefaults, Orchestrator, RunRequest, RunSettings};
use dashjudge_core::errors::{ProviderError, RunError};
use dashjudge_core::judge::parse::UNPARSED_PREFIX;
use dashjudge_core::model::{ModelRef, PromptRole, PromptTemplate, RunStatus};
use dashjudge_core::providers::llm::fake::FakeClient;
use dashjudge_core::providers::llm::{ClientRegistry, Completion, CompletionRequest, LlmClient};
use dashjudge_core::storage::store::Store;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DOC: &str = r#"{"tabs":[{"maps":[{"layers":[{"id":"bg","index":0,"kind":"BackgroundMapDescription","style":"light"}]}]}]}"#;

fn setup(cases: usize) -> Store {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    store
        .upsert_prompt(&PromptTemplate {
            id: "gen".into(),
            version: 1,
            role: PromptRole::Generation,
            template: "Build a dashboard: {{user_prompt}}".into(),
        })
        .unwrap();
    for i in 0..cases {
        store
            .upsert_test_case(
                Some(&format!("case-{}", i)),
                &format!("request {}", i),
                &json!({"tabs": [{"maps": [{"layers": []}]}]}),
                true,
            )
            .unwrap();
    }
    store
}

fn model(id: &str) -> ModelRef {
    ModelRef {
        id: id.into(),
        provider: "fake".into(),
        model: "fake".into(),
        temperature: 0.0,
        max_tokens: 512,
    }
}

fn orchestrator(
    store: &Store,
    generator: Arc<dyn LlmClient>,
    judge: Arc<dyn LlmClient>,
    settings: RunSettings,
) -> Orchestrator {
    let clients = ClientRegistry::new()
        .with(model("gen"), generator)
        .with(model("judge"), judge);
    Orchestrator::new(
        store.clone(),
        clients,
        settings,
        JudgeDefaults {
            prompt_id: None,
            model_id: Some("judge".into()),
        },
    )
}

fn request() -> RunRequest {
    RunRequest {
        prompt_id: "gen".into(),
        model_id: "gen".into(),
        ..Default::default()
    }
}

fn tagged(score: u32, details: &str) -> String {
    format!("<score>{}</score><details>{}</details>", score, details)
}

#[tokio::test]
async fn test_average_ignores_unscored_results() {
    let store = setup(3);
    let judge = Arc::new(FakeClient::scripted([
        tagged(8, "good"),
        "I cannot decide.".to_string(),
        tagged(6, "ok"),
    ]));
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        judge.clone(),
        RunSettings::default(),
    );

    let run_id = orch.start_run(&request()).unwrap();
    let status = orch.spawn(run_id).await.unwrap().unwrap();
    assert_eq!(status, RunStatus::Completed);

    let summary = store.get_run_summary(run_id).unwrap().unwrap();
    assert_eq!(summary.run.status, RunStatus::Completed);
    assert_eq!(summary.run.completed_test_cases, 3);
    assert_eq!(summary.run.total_test_cases, 3);
    assert_eq!(summary.run.average_score, Some(7.0));
    assert!(summary.run.prompt_sha256.is_some());
    assert!(summary.run.completed_at.is_some());

    let scores: Vec<Option<f64>> = summary.results.iter().map(|r| r.comparison_score).collect();
    assert_eq!(scores, vec![Some(8.0), None, Some(6.0)]);
    assert!(summary.results[1]
        .comparison_details
        .starts_with(UNPARSED_PREFIX));
    assert_eq!(
        summary.results[1].raw_judge_response.as_deref(),
        Some("I cannot decide.")
    );

    // judge saw the rendered documents
    let prompts = judge.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("request 0"));
    assert!(prompts[0].contains("\"kind\": \"BackgroundMapDescription\""));
}

#[tokio::test]
async fn test_no_active_test_cases_creates_no_run() {
    let store = setup(0);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(5, "x"))),
        RunSettings::default(),
    );
    let err = orch.start_run(&request()).unwrap_err();
    assert!(matches!(err, RunError::NoActiveTestCases));
    assert!(store.list_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_model_fails_run() {
    let store = setup(2);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(5, "x"))),
        RunSettings::default(),
    );
    let run_id = orch
        .start_run(&RunRequest {
            model_id: "missing".into(),
            ..request()
        })
        .unwrap();

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Failed);
    let run = store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("model 'missing'"));
    assert!(store.list_results(run_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_prompt_role_fails_run() {
    let store = setup(1);
    store
        .upsert_prompt(&PromptTemplate {
            id: "gen".into(),
            version: 2,
            role: PromptRole::Judge,
            template: "{{user_prompt}} {{expected_json}} {{generated_json}}".into(),
        })
        .unwrap();
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(5, "x"))),
        RunSettings::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Failed);
    let run = store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.prompt_version, 2);
    assert!(run.error.unwrap().contains("expected generation"));
}

#[tokio::test]
async fn test_missing_prompt_fails_run() {
    let store = setup(1);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(5, "x"))),
        RunSettings::default(),
    );
    let run_id = orch
        .start_run(&RunRequest {
            prompt_id: "nope".into(),
            ..request()
        })
        .unwrap();
    assert_eq!(store.get_run(run_id).unwrap().unwrap().prompt_version, 0);

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Failed);
    let run = store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert_eq!(
        run.error.as_deref(),
        Some("prompt 'nope' (version latest) not found")
    );
    assert!(store.list_results(run_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_judge_prompt_fails_run() {
    let store = setup(1);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(5, "x"))),
        RunSettings::default(),
    );
    let run_id = orch
        .start_run(&RunRequest {
            judge_prompt_id: Some("strict-judge".into()),
            ..request()
        })
        .unwrap();

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Failed);
    let run = store.get_run(run_id).unwrap().unwrap();
    assert!(run.error.unwrap().contains("prompt 'strict-judge'"));
}

#[tokio::test]
async fn test_judge_not_configured_fails_run() {
    let store = setup(1);
    let generator = Arc::new(FakeClient::new(DOC));
    let orch = Orchestrator::new(
        store.clone(),
        ClientRegistry::new().with(model("gen"), generator.clone()),
        RunSettings::default(),
        JudgeDefaults::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    assert!(store.get_run(run_id).unwrap().unwrap().judge_model_id.is_none());

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Failed);
    let run = store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.error.as_deref(), Some("no judge model configured for this run"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_item_failures_do_not_abort_run() {
    let store = setup(3);
    let generator = Arc::new(
        FakeClient::new(DOC)
            .then_err(ProviderError::Auth("bad key".into()))
            .then_ok("Sorry, I can't help with dashboards."),
    );
    let judge = Arc::new(FakeClient::new(tagged(9, "fine")));
    let orch = orchestrator(&store, generator, judge.clone(), RunSettings::default());

    let run_id = orch.start_run(&request()).unwrap();
    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Completed);

    let summary = store.get_run_summary(run_id).unwrap().unwrap();
    assert_eq!(summary.run.completed_test_cases, 3);
    assert_eq!(summary.run.average_score, Some(9.0));

    let first = &summary.results[0];
    assert_eq!(first.comparison_score, None);
    assert!(first.generated_json.is_none());
    assert!(first.comparison_details.starts_with("generation failed (auth)"));

    let second = &summary.results[1];
    assert_eq!(second.comparison_score, None);
    assert!(second
        .comparison_details
        .starts_with("could not parse generated output"));

    // only the third case reached the judge
    assert_eq!(judge.calls(), 1);
}

#[tokio::test]
async fn test_judge_error_keeps_generated_document() {
    let store = setup(1);
    let judge = Arc::new(FakeClient::new("unused").then_err(ProviderError::InvalidResponse(
        "empty choices".into(),
    )));
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        judge,
        RunSettings::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    orch.execute(run_id).await.unwrap();

    let results = store.list_results(run_id).unwrap();
    assert_eq!(results[0].comparison_score, None);
    assert!(results[0].generated_json.is_some());
    assert!(results[0]
        .comparison_details
        .starts_with("judge failed (invalid_response)"));
    let run = store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.average_score, None);
}

#[tokio::test]
async fn test_retryable_error_is_retried() {
    let store = setup(1);
    let generator = Arc::new(
        FakeClient::new(DOC).then_err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        }),
    );
    let orch = orchestrator(
        &store,
        generator.clone(),
        Arc::new(FakeClient::new(tagged(7, "ok"))),
        RunSettings {
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        },
    );
    let run_id = orch.start_run(&request()).unwrap();
    orch.execute(run_id).await.unwrap();

    assert_eq!(generator.calls(), 2);
    let results = store.list_results(run_id).unwrap();
    assert_eq!(results[0].comparison_score, Some(7.0));
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let store = setup(1);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC).with_delay(Duration::from_millis(500))),
        Arc::new(FakeClient::new(tagged(7, "ok"))),
        RunSettings {
            timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );
    let run_id = orch.start_run(&request()).unwrap();
    orch.execute(run_id).await.unwrap();

    let results = store.list_results(run_id).unwrap();
    assert!(results[0]
        .comparison_details
        .starts_with("generation failed (timeout)"));
}

#[tokio::test]
async fn test_auto_repair_runs_before_judging() {
    let store = setup(1);
    let raw = "```json\n{\"tabs\":[{\"maps\":[{\"layers\":[{\"id\":\"c\",\"index\":0,\"kind\":\"IsolineLayerDescription\",\"options\":{\"line_width\":2}}]}]}]}\n```";
    let judge = Arc::new(FakeClient::new(tagged(8, "ok")));
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(raw)),
        judge.clone(),
        RunSettings {
            auto_repair: true,
            ..Default::default()
        },
    );
    let run_id = orch.start_run(&request()).unwrap();
    orch.execute(run_id).await.unwrap();

    let results = store.list_results(run_id).unwrap();
    let layer = &results[0].generated_json.as_ref().unwrap()["tabs"][0]["maps"][0]["layers"][0];
    assert_eq!(layer["kind"], "ContourLayerDescription");
    assert_eq!(layer["line_width"], 2);
    assert!(!results[0].repair_fixes.is_empty());
    assert!(judge.prompts()[0].contains("ContourLayerDescription"));
}

/// Judge that asks for cancellation of the run after answering.
struct CancellingJudge {
    store: Store,
    run_id: AtomicI64,
    inner: FakeClient,
}

#[async_trait]
impl LlmClient for CancellingJudge {
    async fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, ProviderError> {
        let out = self.inner.complete(req).await;
        self.store
            .request_cancel(self.run_id.load(Ordering::SeqCst))
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;
        out
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[tokio::test]
async fn test_cancel_stops_before_next_case() {
    let store = setup(3);
    let judge = Arc::new(CancellingJudge {
        store: store.clone(),
        run_id: AtomicI64::new(0),
        inner: FakeClient::new(tagged(6, "ok")),
    });
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        judge.clone(),
        RunSettings::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    judge.run_id.store(run_id, Ordering::SeqCst);

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Cancelled);
    let summary = store.get_run_summary(run_id).unwrap().unwrap();
    assert_eq!(summary.run.status, RunStatus::Cancelled);
    assert_eq!(summary.run.completed_test_cases, 1);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.run.average_score, Some(6.0));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let store = setup(2);
    let generator = Arc::new(FakeClient::new(DOC));
    let orch = orchestrator(
        &store,
        generator.clone(),
        Arc::new(FakeClient::new(tagged(6, "ok"))),
        RunSettings::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    assert_eq!(
        store.request_cancel(run_id).unwrap(),
        Some(RunStatus::Cancelled)
    );

    assert_eq!(orch.execute(run_id).await.unwrap(), RunStatus::Cancelled);
    assert_eq!(generator.calls(), 0);
    assert!(store.list_results(run_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_run_cannot_execute_again() {
    let store = setup(1);
    let orch = orchestrator(
        &store,
        Arc::new(FakeClient::new(DOC)),
        Arc::new(FakeClient::new(tagged(6, "ok"))),
        RunSettings::default(),
    );
    let run_id = orch.start_run(&request()).unwrap();
    orch.execute(run_id).await.unwrap();

    let err = orch.execute(run_id).await.unwrap_err();
    assert!(matches!(err, RunError::NotPending { .. }));
    assert_eq!(store.list_results(run_id).unwrap().len(), 1);
}
