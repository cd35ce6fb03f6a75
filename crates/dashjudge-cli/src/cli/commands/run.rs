use super::{build_registry, exit_codes, open_store, print_summary};
use crate::cli::args::RunArgs;
use anyhow::Context;
use dashjudge_core::config::load_config;
use dashjudge_core::engine::{Orchestrator, RunRequest};
use dashjudge_core::errors::RunError;
use dashjudge_core::model::RunStatus;
use std::time::Duration;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let judge = cfg.judge_defaults();
    let judge_model = args.judge_model.clone().or(judge.model_id.clone());
    let Some(judge_model) = judge_model else {
        eprintln!("config error: no judge model (set judge.model or pass --judge-model)");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let registry = match build_registry(&cfg, &[args.model.as_str(), judge_model.as_str()]) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let store = open_store(&args.db)?;
    cfg.import_into(&store)?;

    let orchestrator = Orchestrator::new(
        store.clone(),
        registry,
        cfg.settings.run_settings(),
        judge,
    );
    let request = RunRequest {
        prompt_id: args.prompt.clone(),
        prompt_version: args.prompt_version,
        model_id: args.model.clone(),
        judge_prompt_id: args.judge_prompt.clone(),
        judge_model_id: Some(judge_model),
    };
    let run_id = match orchestrator.start_run(&request) {
        Ok(id) => id,
        Err(RunError::NoActiveTestCases) => {
            eprintln!("config error: no active test cases");
            return Ok(exit_codes::CONFIG_ERROR);
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(run_id, model_id = %args.model, "started run");

    let handle = orchestrator.spawn(run_id);
    let poll = Duration::from_millis(cfg.settings.poll_interval_ms.max(10));
    let mut last_seen = 0;
    while !handle.is_finished() {
        tokio::time::sleep(poll).await;
        if let Some(run) = store.get_run(run_id)? {
            if run.completed_test_cases != last_seen {
                last_seen = run.completed_test_cases;
                tracing::info!(
                    run_id,
                    completed = run.completed_test_cases,
                    total = run.total_test_cases,
                    "progress"
                );
            }
        }
    }
    let status = handle.await.context("run task panicked")??;

    let summary = store
        .get_run_summary(run_id)?
        .with_context(|| format!("run #{} disappeared", run_id))?;
    print_summary(&summary, &args.format)?;

    Ok(match status {
        RunStatus::Completed => exit_codes::OK,
        _ => exit_codes::TEST_FAILED,
    })
}
