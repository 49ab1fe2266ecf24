//! Positions CLI command.
//!
//! Loads the persisted position document with the configured strategies and
//! prints one JSON summary per line. Read-only: the document is never rewritten.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use legwork_core::{AppConfig, ConfigLoader};
use legwork_options_manager::{PositionStore, PositionSummary, StrategyRegistry};
use tracing::info;

/// Arguments for the positions command.
#[derive(Args, Debug, Clone)]
pub struct PositionsArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", env = "LEGWORK_CONFIG")]
    pub config: String,

    /// Directory holding the position document (overrides store.dir)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Blob key of the position document (overrides store.key)
    #[arg(long)]
    pub key: Option<String>,

    /// Include closed, expired and cancelled positions
    #[arg(long)]
    pub all: bool,
}

/// Runs the positions command.
///
/// # Errors
/// Returns an error if the configuration or the position document cannot be read.
pub fn run_positions(args: &PositionsArgs) -> Result<()> {
    let config =
        ConfigLoader::load_from(&args.config).with_context(|| format!("failed to load config from {}", args.config))?;
    let today = chrono::Local::now().date_naive();

    for summary in collect_summaries(&config, args, today)? {
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

fn collect_summaries(config: &AppConfig, args: &PositionsArgs, today: NaiveDate) -> Result<Vec<PositionSummary>> {
    let mut store_config = config.store.clone();
    if let Some(dir) = &args.store_dir {
        store_config.dir.clone_from(dir);
    }
    if let Some(key) = &args.key {
        store_config.key.clone_from(key);
    }

    let strategies = StrategyRegistry::from_config(config);
    let store = PositionStore::from_config(&store_config);
    let registry = store
        .try_load(&strategies, today)
        .with_context(|| format!("failed to read {}", store_config.dir.join(&store_config.key).display()))?;

    let summaries: Vec<PositionSummary> = if args.all {
        registry.positions().map(|position| position.summary()).collect()
    } else {
        registry.open_positions().map(|position| position.summary()).collect()
    };
    info!(
        positions = registry.len(),
        open = registry.open_len(),
        shown = summaries.len(),
        "Loaded position document"
    );
    Ok(summaries)
}
