use super::ReportBundle;
use crate::config::Config;
use crate::gauntlet_config::OutputFormat;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where each report artifact lands.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub report_dir: PathBuf,
    pub metrics_dir: PathBuf,
}

impl ReportPaths {
    pub fn from_config(config: &Config) -> Self {
        Self {
            report_dir: config.report_dir.clone(),
            metrics_dir: config.metrics_dir.clone(),
        }
    }

    pub fn json(&self) -> PathBuf {
        self.report_dir.join("validation-report.json")
    }

    pub fn markdown(&self) -> PathBuf {
        self.report_dir.join("validation-report.md")
    }

    pub fn dashboard(&self) -> PathBuf {
        self.report_dir.join("dashboard.html")
    }

    pub fn metrics(&self) -> PathBuf {
        self.metrics_dir.join("scores.json")
    }
}

/// Write `bytes` to `path` through a synced temp file and a rename, so a
/// reader never observes a half-written report.
pub fn write_durable(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid report path {}", path.display()))?;
    let temp_path = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!(
                "Failed to move {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }

    // Persist the directory entry too; not every platform allows opening a directory.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Write the rendered bundle. The JSON report and the score metrics are
/// always written; narrative and dashboard follow `format`.
pub fn write_bundle(
    paths: &ReportPaths,
    bundle: &ReportBundle,
    format: OutputFormat,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let json = paths.json();
    write_durable(&json, bundle.json.as_bytes())?;
    written.push(json);

    let metrics = paths.metrics();
    write_durable(&metrics, bundle.metrics.as_bytes())?;
    written.push(metrics);

    if format.wants_markdown() {
        let md = paths.markdown();
        write_durable(&md, bundle.narrative.as_bytes())?;
        written.push(md);
    }
    if format.wants_html() {
        let html = paths.dashboard();
        write_durable(&html, bundle.dashboard.as_bytes())?;
        written.push(html);
    }

    tracing::debug!(files = written.len(), dir = %paths.report_dir.display(), "Reports written");
    Ok(written)
}
