//! Command-line entry point for the corridor simulation.
//!
//! Runs every scenario of a comparison file side by side and prints how each
//! one fared against the baseline.
//!
//! # Startup Sequence
//!
//! 1. Parse the command line
//! 2. Load and validate the comparison file
//! 3. Initialize structured logging (tracing) from its `logging` section
//! 4. Run the scenarios on the blocking pool
//! 5. Print the summary, or the full report as JSON with `--json`

mod cli;
mod error;
mod output;

use chrono::Utc;
use clap::Parser;
use corridor_core::config::LoggingConfig;
use corridor_core::runner::{self, ComparisonSpec};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::CliArgs;
use crate::error::EngineError;
use crate::output::RunEnvelope;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the comparison cannot be loaded, logging cannot be
/// installed, or any scenario fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let args = CliArgs::parse();
    let spec = ComparisonSpec::from_file(&args.comparison)?;
    init_logging(&spec.logging)?;

    info!(
        comparison = %args.comparison.display(),
        scenarios = spec.scenarios.len(),
        max_concurrency = spec.max_concurrency,
        "corridor-engine starting"
    );

    let started_at = Utc::now();
    let report = runner::compare_scenarios(spec).await?;
    let envelope = RunEnvelope::new(started_at, report);

    for run in &envelope.report.reports {
        info!(
            scenario = run.scenario,
            ticks = run.ticks,
            exited_mass = run.final_metrics.exited_mass,
            delay_hours = run.final_metrics.delay_hours.total(),
            "Scenario complete"
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print!("{}", output::render_summary(&envelope));
    }

    info!(run_id = %envelope.run_id, "corridor-engine finished");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level;
/// logs go to stderr so stdout carries only the report.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}
