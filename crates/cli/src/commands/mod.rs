//! CLI commands.

pub mod check_config;
pub mod positions;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use positions::{run_positions, PositionsArgs};
