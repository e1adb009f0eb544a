//! Configuration view and validation commands (`gauntlet config`).

use anyhow::Result;
use std::process::ExitCode;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<ExitCode> {
    use gauntlet::gauntlet_config::{CONFIG_FILE_NAME, GauntletToml};
    use gauntlet::phase::{PhaseRegistry, default_executors, default_phase_defs};

    let project_dir = cli.project_dir()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Gauntlet Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Using built-in defaults. Run 'gauntlet config init' to create one.");
            }
            println!();

            // Effective values include GAUNTLET_* environment overrides.
            let mut toml = GauntletToml::load_or_default(&project_dir, cli.config.as_deref())?;
            toml.apply_env()?;
            if toml.phases.is_empty() {
                toml.phases = default_phase_defs();
            }
            print!("{}", toml.to_toml_string()?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                GauntletToml::load(&config_path)?
            } else {
                println!("No {} found. Checking built-in defaults.", CONFIG_FILE_NAME);
                GauntletToml::default()
            };

            let warnings = toml.validate();
            if let Err(e) = PhaseRegistry::from_config(&toml) {
                println!("Configuration is invalid:");
                println!("  - {}", e);
                return Ok(ExitCode::from(1));
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(ExitCode::SUCCESS);
            }

            let toml = GauntletToml {
                executors: default_executors(),
                phases: default_phase_defs(),
                ..Default::default()
            };
            gauntlet::report::write_durable(&config_path, toml.to_toml_string()?.as_bytes())?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [run] retries, timeouts, parallel jobs, report format");
            println!("  - [scoring] readiness tiers");
            println!("  - [recovery] timeout policy, heap limits, tool search paths");
            println!("  - [executors.*] and [[phases]] for the phase catalog");
            println!();
        }
    }

    Ok(ExitCode::SUCCESS)
}
