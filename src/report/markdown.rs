use super::{RunSummary, format_duration, is_partial, recommendations, timestamp};
use crate::orchestrator::state::{PhaseStatus, ValidationRun};
use chrono::{DateTime, Utc};

fn status_cell(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Success => "PASS",
        PhaseStatus::Failed => "FAIL",
        PhaseStatus::Skipped => "SKIP",
        PhaseStatus::Running => "RUNNING",
        PhaseStatus::Pending => "PENDING",
    }
}

/// Table cells cannot contain raw pipes or newlines.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn check(met: bool) -> &'static str {
    if met { "yes" } else { "no" }
}

/// Human-readable narrative report.
pub fn render(run: &ValidationRun, generated_at: DateTime<Utc>) -> String {
    let summary = RunSummary::of(run);
    let mut text = String::new();

    text.push_str("# Validation Report\n\n");
    if is_partial(run) {
        text.push_str("> **Partial report:** the run was interrupted before every phase finished.\n\n");
    }

    text.push_str(&format!("- **Run:** `{}`\n", run.id));
    text.push_str(&format!("- **Started:** {}\n", timestamp(run.started_at)));
    if let Some(finished) = run.finished_at {
        text.push_str(&format!("- **Finished:** {}\n", timestamp(finished)));
    }
    text.push_str(&format!("- **Generated:** {}\n", timestamp(generated_at)));
    text.push_str(&format!(
        "- **Score:** {:.1} / {}\n",
        run.overall_score, run.max_score
    ));
    text.push_str(&format!(
        "- **Verdict:** {}\n",
        run.readiness_tier.label()
    ));
    text.push_str(&format!(
        "- **Phases:** {} executed / {} total ({} passed, {} failed, {} skipped)\n\n",
        summary.executed, summary.total, summary.passed, summary.failed, summary.skipped
    ));

    text.push_str("## Phases\n\n");
    text.push_str("| Phase | Status | Score | Weight | Attempts | Duration | Notes |\n");
    text.push_str("|-------|--------|------:|-------:|---------:|---------:|-------|\n");
    for phase in &run.phases {
        let notes = match phase.status {
            PhaseStatus::Success => phase.warnings.join("; "),
            _ => phase.reason.clone().unwrap_or_default(),
        };
        text.push_str(&format!(
            "| {} | {} | {:.1} | {} | {} | {} | {} |\n",
            cell(&phase.name),
            status_cell(phase.status),
            phase.score,
            phase.weight,
            phase.attempts,
            format_duration(phase.duration_secs()),
            cell(&notes)
        ));
    }
    text.push('\n');

    let compliance = run
        .config
        .scoring
        .compliance(run.overall_score, run.failed_count());
    if !compliance.is_empty() {
        text.push_str("## Threshold Compliance\n\n");
        text.push_str("| Tier | Min score | Max failures | Score met | Failures met |\n");
        text.push_str("|------|----------:|-------------:|-----------|--------------|\n");
        for rule in &compliance {
            text.push_str(&format!(
                "| {} | {:.0} | {} | {} | {} |\n",
                rule.tier.label(),
                rule.min_score,
                rule.max_failures,
                check(rule.score_met),
                check(rule.failures_met)
            ));
        }
        text.push('\n');
    }

    if !run.recovery_attempts.is_empty() {
        text.push_str("## Recovery Attempts\n\n");
        text.push_str("| Phase | Category | Strategy | Outcome | Detail |\n");
        text.push_str("|-------|----------|----------|---------|--------|\n");
        for attempt in &run.recovery_attempts {
            text.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                cell(&attempt.phase),
                attempt.error_category,
                cell(&attempt.strategy_applied),
                attempt.outcome,
                cell(&attempt.detail)
            ));
        }
        text.push('\n');
    }

    let failed: Vec<_> = run
        .phases
        .iter()
        .filter(|p| p.status == PhaseStatus::Failed && !p.errors.is_empty())
        .collect();
    if !failed.is_empty() {
        text.push_str("## Failure Details\n\n");
        for phase in failed {
            text.push_str(&format!("### {}\n\n", phase.name.replace('\n', " ")));
            for error in &phase.errors {
                text.push_str(&format!("- {}\n", error.replace('\n', " ")));
            }
            if !phase.artifact_paths.is_empty() {
                text.push_str("\nArtifacts:\n");
                for path in &phase.artifact_paths {
                    text.push_str(&format!("- `{}`\n", path.display()));
                }
            }
            text.push('\n');
        }
    }

    text.push_str("## Recommendations\n\n");
    for rec in recommendations(run) {
        text.push_str(&format!("- {}\n", rec));
    }

    text
}
