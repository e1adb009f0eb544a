//! Report regeneration (`gauntlet report`).

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;

use super::super::Cli;

pub fn cmd_report(cli: &Cli, input: Option<&Path>, format: Option<&str>) -> Result<ExitCode> {
    use gauntlet::config::Config;
    use gauntlet::gauntlet_config::{CliOverrides, OutputFormat};
    use gauntlet::report::{self, JsonReport, ReportPaths};

    let project_dir = cli.project_dir()?;
    let overrides = CliOverrides {
        output_dir: cli.output_dir.clone(),
        ..Default::default()
    };
    let config = Config::load(&project_dir, cli.config.as_deref(), &overrides, cli.verbose > 0)?;

    let source = match input {
        Some(path) => path.to_path_buf(),
        None => config.json_report_path(),
    };
    if !source.exists() {
        anyhow::bail!(
            "No report found at {}. Run 'gauntlet run' first.",
            source.display()
        );
    }

    let saved = JsonReport::load(&source)?;
    let format = match format {
        Some(f) => f.parse::<OutputFormat>()?,
        None => config.settings().run.format,
    };

    let bundle = report::render(&saved.run, chrono::Utc::now())
        .with_context(|| format!("Failed to render report from {}", source.display()))?;
    let written = report::write_bundle(&ReportPaths::from_config(&config), &bundle, format)?;

    println!(
        "Regenerated reports for run {} ({:.1}/{} {})",
        saved.run.id,
        saved.run.overall_score,
        saved.run.max_score,
        saved.run.readiness_tier.label()
    );
    for path in &written {
        println!("  {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}
