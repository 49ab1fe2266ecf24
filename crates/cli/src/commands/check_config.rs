//! Check-config CLI command.

use anyhow::{Context, Result};
use clap::Args;
use legwork_core::ConfigLoader;
use legwork_options_manager::StrategyKind;
use tracing::warn;

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", env = "LEGWORK_CONFIG")]
    pub config: String,
}

/// Loads the configuration the way the engine would and prints it as JSON.
///
/// # Errors
/// Returns an error if the configuration cannot be read or parsed.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config =
        ConfigLoader::load_from(&args.config).with_context(|| format!("failed to load config from {}", args.config))?;

    for tag in config.strategies.keys() {
        if tag.parse::<StrategyKind>().is_err() {
            warn!(tag, "Configured strategy is not a known strategy kind");
        }
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
