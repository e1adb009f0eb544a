//! Phase orchestration (`gauntlet run`).

use anyhow::Result;
use console::style;
use std::process::ExitCode;
use std::sync::Arc;

use super::super::{Cli, RunArgs};

impl RunArgs {
    /// Collect run flags into configuration overrides.
    pub fn overrides(&self, cli: &Cli) -> Result<gauntlet::gauntlet_config::CliOverrides> {
        use gauntlet::gauntlet_config::{CliOverrides, OutputFormat, PhaseCategory};

        let mut skip_categories = Vec::new();
        for (flag, category) in [
            (self.skip_formal, PhaseCategory::Formal),
            (self.skip_proofs, PhaseCategory::Proofs),
            (self.skip_tests, PhaseCategory::Tests),
            (self.skip_stress, PhaseCategory::Stress),
            (self.skip_performance, PhaseCategory::Performance),
        ] {
            if flag {
                skip_categories.push(category);
            }
        }

        let format = match self.format {
            Some(ref f) => Some(f.parse::<OutputFormat>()?),
            None => None,
        };

        Ok(CliOverrides {
            continue_on_error: self.continue_on_error,
            max_retries: self.max_retries,
            timeout_secs: self.timeout,
            jobs: self.jobs,
            format,
            output_dir: cli.output_dir.clone(),
            phase_timeouts: self.phase_timeouts.clone(),
            skip_categories,
            skip_phases: self.skip_phases.clone(),
        })
    }
}

pub async fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    use gauntlet::config::Config;
    use gauntlet::executor::ExecutorRegistry;
    use gauntlet::orchestrator::{Orchestrator, RunSettings};
    use gauntlet::phase::PhaseRegistry;
    use gauntlet::recovery::RecoveryPolicy;
    use gauntlet::report::{self, ReportPaths};
    use gauntlet::telemetry;
    use gauntlet::tool::ToolPaths;
    use gauntlet::ui::OrchestratorUI;
    use tokio_util::sync::CancellationToken;

    let project_dir = cli.project_dir()?;
    let overrides = args.overrides(cli)?;
    let config = Config::load(&project_dir, cli.config.as_deref(), &overrides, cli.verbose > 0)?;

    let _guard = if args.dry_run {
        telemetry::init_tracing(cli.verbose, None)
    } else {
        config.ensure_directories()?;
        telemetry::init_tracing(cli.verbose, Some(&config.run_log_path()))
    };

    for warning in &config.load_warnings {
        tracing::warn!("{}", warning);
    }
    for warning in config.settings().validate() {
        tracing::warn!("{}", warning);
    }

    let mut registry = PhaseRegistry::from_config(config.settings())?;
    for name in registry.apply_skips(&overrides.skip_categories, &overrides.skip_phases) {
        tracing::warn!(phase = %name, "Unknown phase in --skip-phase, ignoring");
    }
    for name in registry.apply_timeouts(&overrides.phase_timeouts) {
        tracing::warn!(phase = %name, "Unknown phase in --phase-timeout, ignoring");
    }

    let executors = ExecutorRegistry::from_defs(registry.executors(), &ToolPaths::from_env())?;
    let settings = RunSettings::from_config(&config);

    if args.dry_run {
        print_plan(&registry, &settings);
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::warn!("Ctrl-C received; interrupting validation run");
                    signal_token.cancel();
                }
            }
            _ = signal_token.cancelled() => {}
        }
    });

    let ui = Arc::new(OrchestratorUI::new(registry.len() as u64, cli.verbose > 0));
    let recovery = RecoveryPolicy::from_config(&config.settings().recovery);
    let orchestrator = Orchestrator::new(registry, executors, recovery, settings)?
        .with_ui(ui)
        .with_cancellation(cancel.clone());

    let run = orchestrator.run().await?;
    // Stop the signal listener.
    cancel.cancel();

    let bundle = report::render(&run, chrono::Utc::now())?;
    let written = report::write_bundle(
        &ReportPaths::from_config(&config),
        &bundle,
        config.settings().run.format,
    )?;

    println!();
    println!(
        "{} {:.1}/{} {}",
        style("Score:").bold(),
        run.overall_score,
        run.max_score,
        style(run.readiness_tier.label()).bold()
    );
    println!(
        "{} executed / {} total ({} passed, {} failed, {} skipped)",
        run.executed_count(),
        run.total_count(),
        run.passed_count(),
        run.failed_count(),
        run.skipped_count()
    );
    if run.interrupted {
        println!("{}", style("Run interrupted; reports are partial.").yellow());
    }
    for path in &written {
        println!("  {}", style(path.display()).dim());
    }

    if run.interrupted {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::from(run.readiness_tier.exit_code()))
}

fn print_plan(
    registry: &gauntlet::phase::PhaseRegistry,
    settings: &gauntlet::orchestrator::RunSettings,
) {
    println!();
    println!("Execution plan (dry run)");
    println!("========================");
    println!(
        "max_attempts = {}  jobs = {}  continue_on_error = {}",
        settings.max_attempts, settings.jobs, settings.continue_on_error
    );
    println!();
    for (i, spec) in registry.iter().enumerate() {
        let status = if spec.enabled {
            style("run".to_string()).green()
        } else {
            style(format!(
                "skip ({})",
                spec.disabled_reason.as_deref().unwrap_or("disabled")
            ))
            .dim()
        };
        let dependency = spec
            .depends_on
            .as_deref()
            .map(|d| format!(" after {}", d))
            .unwrap_or_default();
        println!(
            "{:>2}. {:<20} weight {:>4}  timeout {:>5}s  {}{}",
            i + 1,
            spec.name,
            spec.weight,
            spec.timeout.as_secs(),
            status,
            dependency
        );
    }
    println!();
}
