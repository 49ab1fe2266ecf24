use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckConfigArgs, PositionsArgs};

#[derive(Parser)]
#[command(name = "legwork")]
#[command(about = "Inspect legwork options position state and configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print persisted positions as JSON lines
    Positions(PositionsArgs),
    /// Load and print the merged configuration
    CheckConfig(CheckConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Positions(args) => commands::run_positions(&args)?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
    }

    Ok(())
}
