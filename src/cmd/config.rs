//! Configuration view and validation commands: `shopflow config`.

use anyhow::{Context, Result, bail};
use std::path::Path;

use shopflow::config::{DEFAULT_CONFIG_PATH, ShopConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: Option<&Path>,
    effective: &ShopConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# shopflow configuration");
            if config_path.exists() {
                println!("# file: {}", config_path.display());
            } else {
                println!("# file: {} (not found, using defaults)", config_path.display());
            }
            println!("# effective values include environment overrides");
            println!();
            let rendered =
                toml::to_string_pretty(effective).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!(
                    "No config file at {}; defaults are valid.",
                    config_path.display()
                );
                return Ok(());
            }
            let config = ShopConfig::load(config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid: {}", config_path.display());
            } else {
                println!("Configuration warnings ({}):", config_path.display());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists. Use --force to overwrite.",
                    config_path.display()
                );
            }
            ShopConfig::default().save(config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}
