use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::gauntlet_config::{CliOverrides, GauntletToml};

/// Runtime configuration for Gauntlet.
///
/// Bridges the layered `GauntletToml` settings with the filesystem layout of
/// a run: the output directory and its `logs/`, `reports/`, `artifacts/` and
/// `metrics/` subdirectories.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub report_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub verbose: bool,
    /// Problems noticed while loading that did not stop it
    pub load_warnings: Vec<String>,
    settings: GauntletToml,
}

impl Config {
    /// Load configuration for a project: `.env`, then `gauntlet.toml` (or the
    /// explicit file), then `GAUNTLET_*` environment overrides, then CLI flags.
    pub fn load(
        project_dir: &Path,
        config_file: Option<&Path>,
        cli: &CliOverrides,
        verbose: bool,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory {}", project_dir.display()))?;

        let load_warnings = load_dotenv(&project_dir.join(".env")).into_iter().collect();

        let mut settings = GauntletToml::load_or_default(&project_dir, config_file)?;
        settings.apply_env()?;
        settings.apply_cli(cli);

        let mut config = Self::from_settings(project_dir, settings, verbose);
        config.load_warnings = load_warnings;
        Ok(config)
    }

    /// Build from already-layered settings.
    pub fn from_settings(project_dir: PathBuf, settings: GauntletToml, verbose: bool) -> Self {
        let output_dir = if settings.run.output_dir.is_absolute() {
            settings.run.output_dir.clone()
        } else {
            project_dir.join(&settings.run.output_dir)
        };

        Self {
            log_dir: output_dir.join("logs"),
            report_dir: output_dir.join("reports"),
            artifact_dir: output_dir.join("artifacts"),
            metrics_dir: output_dir.join("metrics"),
            output_dir,
            project_dir,
            verbose,
            load_warnings: Vec::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &GauntletToml {
        &self.settings
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.report_dir).context("Failed to create report directory")?;
        std::fs::create_dir_all(&self.artifact_dir)
            .context("Failed to create artifact directory")?;
        std::fs::create_dir_all(&self.metrics_dir).context("Failed to create metrics directory")?;
        Ok(())
    }

    /// Combined tracing log for a run.
    pub fn run_log_path(&self) -> PathBuf {
        self.log_dir.join("run.log")
    }

    /// The machine-readable report, also the source for `gauntlet report`.
    pub fn json_report_path(&self) -> PathBuf {
        self.report_dir.join("validation-report.json")
    }
}

/// Load a `.env` file into the process environment. A missing file is
/// normal; anything else comes back as a warning.
fn load_dotenv(path: &Path) -> Option<String> {
    match dotenvy::from_path(path) {
        Ok(()) => None,
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable .env file");
            Some(format!("Ignoring {}: {}", path.display(), e))
        }
    }
}
