//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Corridor scenario comparison
///
/// Runs every scenario of a comparison file side by side and reports how
/// each one fared against the baseline.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "corridor-engine")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the comparison file (YAML)
    pub comparison: PathBuf,

    /// Print the full report as JSON instead of a text summary
    #[arg(long)]
    pub json: bool,
}
