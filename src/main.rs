use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(version, about = "Validation pipeline orchestrator with scoring and readiness reports")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Project to validate (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Configuration file (defaults to <project-dir>/gauntlet.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output directory for logs, reports, artifacts and metrics
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the validation phases and write reports
    Run(RunArgs),
    /// List the phase catalog
    List,
    /// Regenerate reports from a saved JSON report
    Report {
        /// JSON report to render (defaults to <output-dir>/reports/validation-report.json)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output format: json, markdown, html, all
        #[arg(long)]
        format: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// Show the execution plan without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip formal model checking phases
    #[arg(long)]
    pub skip_formal: bool,

    /// Skip theorem proving phases
    #[arg(long)]
    pub skip_proofs: bool,

    /// Skip build and test phases
    #[arg(long)]
    pub skip_tests: bool,

    /// Skip stress phases
    #[arg(long)]
    pub skip_stress: bool,

    /// Skip performance phases
    #[arg(long)]
    pub skip_performance: bool,

    /// Skip a phase by name (repeatable)
    #[arg(long = "skip-phase", value_name = "NAME")]
    pub skip_phases: Vec<String>,

    /// Keep running after a phase fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Global per-phase timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Per-phase timeout override (repeatable)
    #[arg(long = "phase-timeout", value_name = "NAME=SECS", value_parser = gauntlet::gauntlet_config::parse_phase_timeout)]
    pub phase_timeouts: Vec<(String, u64)>,

    /// Total attempts per phase
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Phases allowed to run at once
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Report format: json, markdown, html, all
    #[arg(long)]
    pub format: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and the phase catalog
    Validate,
    /// Write a default gauntlet.toml
    Init,
}

impl Cli {
    pub fn project_dir(&self) -> Result<PathBuf> {
        match self.project_dir.clone() {
            Some(dir) => Ok(dir),
            None => std::env::current_dir().context("Failed to get current directory"),
        }
    }
}

async fn dispatch(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(cli, args).await,
        Commands::List => {
            let _guard = gauntlet::telemetry::init_tracing(cli.verbose, None);
            cmd::cmd_list(cli)
        }
        Commands::Report { input, format } => {
            let _guard = gauntlet::telemetry::init_tracing(cli.verbose, None);
            cmd::cmd_report(cli, input.as_deref(), format.as_deref())
        }
        Commands::Config { command } => {
            let _guard = gauntlet::telemetry::init_tracing(cli.verbose, None);
            cmd::cmd_config(cli, command.clone())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit 1; 2 is reserved for a conditional verdict.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(1)
        }
    }
}
