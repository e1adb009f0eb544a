//! Phase catalog listing (`gauntlet list`).

use anyhow::Result;
use console::style;
use std::process::ExitCode;

use super::super::Cli;

pub fn cmd_list(cli: &Cli) -> Result<ExitCode> {
    use gauntlet::gauntlet_config::GauntletToml;
    use gauntlet::phase::PhaseRegistry;

    let project_dir = cli.project_dir()?;
    let mut settings = GauntletToml::load_or_default(&project_dir, cli.config.as_deref())?;
    settings.apply_env()?;
    let registry = PhaseRegistry::from_config(&settings)?;

    println!();
    println!(
        "{:<20} {:<12} {:>6} {:>8}  {:<18} {}",
        "PHASE", "CATEGORY", "WEIGHT", "TIMEOUT", "EXECUTOR", "DEPENDS ON"
    );
    for spec in registry.iter() {
        let name = if spec.enabled {
            style(format!("{:<20}", spec.name)).bold()
        } else {
            style(format!("{:<20}", spec.name)).dim()
        };
        println!(
            "{} {:<12} {:>6} {:>7}s  {:<18} {}",
            name,
            spec.category.to_string(),
            spec.weight,
            spec.timeout.as_secs(),
            spec.executor,
            spec.depends_on.as_deref().unwrap_or("-")
        );
        if !spec.description.is_empty() && cli.verbose > 0 {
            println!("    {}", style(&spec.description).dim());
        }
    }
    println!();
    println!(
        "{} phases, total weight {}/{}",
        registry.len(),
        registry.total_weight(),
        registry.max_score()
    );

    Ok(ExitCode::SUCCESS)
}
