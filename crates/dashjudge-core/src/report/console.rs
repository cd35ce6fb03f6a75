use crate::model::{RunStatus, RunSummary};

/// Renders a run summary to stderr.
pub fn print_summary(summary: &RunSummary) {
    eprint!("{}", render_summary(summary));
}

pub fn render_summary(summary: &RunSummary) -> String {
    let run = &summary.run;
    let mut out = String::new();

    out.push_str(&format!(
        "\nRun #{} [{}] prompt {} v{} / model {}",
        run.id, run.status, run.prompt_id, run.prompt_version, run.model_id
    ));
    if let Some(judge) = &run.judge_model_id {
        out.push_str(&format!(" / judge {}", judge));
    }
    out.push('\n');

    for r in &summary.results {
        let latency = r
            .latency_ms
            .map(|ms| format!("({:.1}s)", ms as f64 / 1000.0))
            .unwrap_or_default();
        match r.comparison_score {
            Some(score) => out.push_str(&format!(
                "✅ case {:<6} {:>5.1}  {}\n",
                r.test_case_id, score, latency
            )),
            None => out.push_str(&format!(
                "⚠️  case {:<6} {:>5}  {}\n",
                r.test_case_id, "n/a", latency
            )),
        }
        out.push_str(&format!("    {}\n", first_line(&r.comparison_details)));
        if !r.repair_fixes.is_empty() {
            out.push_str(&format!("    repaired: {}\n", r.repair_fixes.join("; ")));
        }
    }

    let average = run
        .average_score
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "n/a".into());
    out.push_str(&format!(
        "\nProgress: {}/{} | valid scores: {} | average: {}\n",
        run.completed_test_cases,
        run.total_test_cases,
        summary.valid_score_count(),
        average
    ));

    match run.status {
        RunStatus::Failed => {
            out.push_str(&format!(
                "❌ run failed: {}\n",
                run.error.as_deref().unwrap_or("unknown error")
            ));
        }
        RunStatus::Cancelled => out.push_str("⏹️  run cancelled\n"),
        _ => {}
    }
    out
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}
