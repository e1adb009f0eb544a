use super::{RunSummary, format_duration, is_partial, recommendations, score_ratio, timestamp};
use crate::orchestrator::state::{PhaseStatus, ValidationRun};
use crate::scoring::ReadinessTier;
use chrono::{DateTime, Utc};

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", sans-serif; margin: 2rem auto; max-width: 960px; color: #1f2328; }
h1 { margin-bottom: 0.25rem; }
.meta { color: #656d76; font-size: 0.9rem; }
.banner { background: #fff8c5; border: 1px solid #d4a72c; padding: 0.5rem 1rem; border-radius: 6px; }
.score { font-size: 2.5rem; font-weight: 600; }
.tier { display: inline-block; padding: 0.2rem 0.8rem; border-radius: 1rem; color: #fff; font-weight: 600; }
.tier-ready { background: #1a7f37; }
.tier-conditional { background: #bf8700; }
.tier-needs_improvement { background: #cf222e; }
.gauge { background: #eaeef2; border-radius: 4px; height: 12px; width: 100%; }
.gauge > div { background: #0969da; height: 12px; border-radius: 4px; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border-bottom: 1px solid #d0d7de; padding: 0.4rem 0.6rem; text-align: left; }
td.num { text-align: right; }
.status-success { color: #1a7f37; font-weight: 600; }
.status-failed { color: #cf222e; font-weight: 600; }
.status-skipped, .status-pending, .status-running { color: #656d76; }
"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn gauge(ratio: f64) -> String {
    let pct = (ratio.clamp(0.0, 1.0) * 100.0).round();
    format!(
        "<div class=\"gauge\"><div style=\"width: {}%\"></div></div>",
        pct
    )
}

/// Self-contained HTML dashboard.
pub fn render(run: &ValidationRun, generated_at: DateTime<Utc>) -> String {
    let summary = RunSummary::of(run);
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Validation Dashboard</title>\n");
    html.push_str(&format!("<style>{}</style>\n</head>\n<body>\n", STYLE));
    html.push_str("<h1>Validation Dashboard</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Run <code>{}</code> &middot; started {} &middot; generated {}</p>\n",
        run.id,
        timestamp(run.started_at),
        timestamp(generated_at)
    ));
    if is_partial(run) {
        html.push_str("<p class=\"banner\">Partial report: the run was interrupted before every phase finished.</p>\n");
    }

    let overall_ratio = if run.max_score == 0 {
        0.0
    } else {
        run.overall_score / run.max_score as f64
    };
    html.push_str(&format!(
        "<p><span class=\"score\">{:.1}</span> / {} <span class=\"tier tier-{}\">{}</span></p>\n",
        run.overall_score,
        run.max_score,
        run.readiness_tier,
        escape(run.readiness_tier.label())
    ));
    html.push_str(&gauge(overall_ratio));
    html.push('\n');
    html.push_str(&format!(
        "<p>{} executed / {} total &middot; {} passed &middot; {} failed &middot; {} skipped</p>\n",
        summary.executed, summary.total, summary.passed, summary.failed, summary.skipped
    ));

    html.push_str("<h2>Phases</h2>\n<table>\n");
    html.push_str("<tr><th>Phase</th><th>Status</th><th>Score</th><th>Weight</th><th>Progress</th><th>Attempts</th><th>Duration</th><th>Notes</th></tr>\n");
    for phase in &run.phases {
        let notes = match phase.status {
            PhaseStatus::Success => phase.warnings.join("; "),
            _ => phase.reason.clone().unwrap_or_default(),
        };
        html.push_str(&format!(
            "<tr><td>{}</td><td class=\"status-{}\">{}</td><td class=\"num\">{:.1}</td><td class=\"num\">{}</td><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td>{}</td></tr>\n",
            escape(&phase.name),
            phase.status,
            phase.status,
            phase.score,
            phase.weight,
            gauge(score_ratio(phase)),
            phase.attempts,
            format_duration(phase.duration_secs()),
            escape(&notes)
        ));
    }
    html.push_str("</table>\n");

    let compliance = run
        .config
        .scoring
        .compliance(run.overall_score, run.failed_count());
    if !compliance.is_empty() {
        html.push_str("<h2>Threshold Compliance</h2>\n<table>\n");
        html.push_str("<tr><th>Tier</th><th>Min score</th><th>Max failures</th><th>Met</th></tr>\n");
        for rule in &compliance {
            let class = if rule.met() { "status-success" } else { "status-failed" };
            let marker = if rule.tier == run.readiness_tier { " (current)" } else { "" };
            html.push_str(&format!(
                "<tr><td>{}{}</td><td class=\"num\">{:.0}</td><td class=\"num\">{}</td><td class=\"{}\">{}</td></tr>\n",
                escape(rule.tier.label()),
                marker,
                rule.min_score,
                rule.max_failures,
                class,
                if rule.met() { "yes" } else { "no" }
            ));
        }
        html.push_str("</table>\n");
    }

    if !run.recovery_attempts.is_empty() {
        html.push_str("<h2>Recovery Attempts</h2>\n<table>\n");
        html.push_str("<tr><th>Phase</th><th>Category</th><th>Strategy</th><th>Outcome</th><th>Detail</th></tr>\n");
        for attempt in &run.recovery_attempts {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&attempt.phase),
                attempt.error_category,
                escape(&attempt.strategy_applied),
                attempt.outcome,
                escape(&attempt.detail)
            ));
        }
        html.push_str("</table>\n");
    }

    html.push_str("<h2>Recommendations</h2>\n<ul>\n");
    for rec in recommendations(run) {
        html.push_str(&format!("<li>{}</li>\n", escape(&rec)));
    }
    html.push_str("</ul>\n");

    if run.readiness_tier == ReadinessTier::Ready {
        html.push_str("<p class=\"status-success\">All readiness thresholds met.</p>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::test_support::sample_run;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_dashboard_contents() {
        let run = sample_run();
        let html = render(&run, Utc::now());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("tier-conditional"));
        assert!(html.contains("<span class=\"score\">170.0</span> / 300"));
        assert!(html.contains("class=\"status-failed\">failed"));
        assert!(html.contains("Conditionally Ready (current)"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_gauge_clamps() {
        assert!(gauge(1.7).contains("width: 100%"));
        assert!(gauge(-0.2).contains("width: 0%"));
    }
}
