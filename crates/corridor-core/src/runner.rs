//! Run loops: a single scenario to completion, or several side by side.
//!
//! [`run_simulation`] drives [`SimulationState::run_tick`] for a fixed number
//! of ticks, keeps a metrics sample every `sample_every_ticks`, and notifies
//! a [`TickObserver`] after each tick.
//!
//! [`compare_scenarios`] runs every scenario of a [`ComparisonSpec`] on the
//! blocking thread pool, at most `max_concurrency` at a time. Scenario runs
//! share nothing, so the comparison result equals running each scenario
//! alone.

use std::path::Path;
use std::sync::Arc;

use corridor_types::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::LoggingConfig;
use crate::metrics::MetricsDiff;
use crate::scenario::{ScenarioError, ScenarioSpec};
use crate::tick::{SimulationState, TickError, TickOutcome};

/// Errors that can occur during a run or comparison.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("scenario {scenario}: tick error: {source}")]
    Tick {
        /// Scenario that failed.
        scenario: String,
        /// The underlying tick error.
        source: Box<TickError>,
    },

    /// A comparison file could not be loaded.
    #[error("comparison file: {source}")]
    Scenario {
        /// The underlying error.
        #[from]
        source: ScenarioError,
    },

    /// A comparison file could not be parsed.
    #[error("failed to parse comparison YAML: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// The comparison lists no scenarios.
    #[error("comparison has no scenarios")]
    EmptyComparison,

    /// The named baseline is not among the scenarios.
    #[error("baseline scenario {name} is not in the comparison")]
    UnknownBaseline {
        /// Requested baseline.
        name: String,
    },

    /// A scenario task panicked or was cancelled.
    #[error("scenario task failed: {message}")]
    Join {
        /// Rendered join error.
        message: String,
    },
}

/// Callback invoked after each tick completes.
pub trait TickObserver: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, outcome: &TickOutcome, state: &SimulationState);
}

/// An observer that ignores every tick.
pub struct NoOpObserver;

impl TickObserver for NoOpObserver {
    fn on_tick(&mut self, _outcome: &TickOutcome, _state: &SimulationState) {}
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name.
    pub scenario: String,
    /// Ticks executed.
    pub ticks: u64,
    /// Metrics after the last tick.
    pub final_metrics: MetricsSnapshot,
    /// Sampled metrics, always including the last tick.
    pub samples: Vec<MetricsSnapshot>,
}

/// Run `state` for `max_ticks` ticks.
///
/// # Errors
///
/// Returns [`RunnerError::Tick`] if any tick fails.
pub fn run_simulation(
    state: &mut SimulationState,
    max_ticks: u64,
    observer: &mut dyn TickObserver,
) -> Result<RunReport, RunnerError> {
    let sample_every = state.config().simulation.sample_every_ticks.max(1);
    let mut samples = Vec::new();
    let mut last: Option<MetricsSnapshot> = None;

    info!(
        scenario = state.name(),
        max_ticks,
        dt_s = state.clock().dt_s(),
        seed = state.config().simulation.seed,
        "Simulation starting"
    );

    for _ in 0..max_ticks {
        let outcome = state.run_tick().map_err(|source| RunnerError::Tick {
            scenario: state.name().to_owned(),
            source: Box::new(source),
        })?;
        observer.on_tick(&outcome, state);

        if outcome.metrics.tick % sample_every == 0 {
            info!(
                scenario = state.name(),
                tick = outcome.metrics.tick,
                active_mass = outcome.metrics.active_mass,
                exited_mass = outcome.metrics.exited_mass,
                queue = outcome.metrics.checkpoint_queue_len,
                delay_hours = outcome.metrics.delay_hours.total(),
                "Sample"
            );
            samples.push(outcome.metrics.clone());
        }
        last = Some(outcome.metrics);
    }

    let final_metrics = match last {
        Some(metrics) => metrics,
        None => {
            warn!(scenario = state.name(), "Run executed no ticks");
            empty_snapshot()
        }
    };
    if samples.last().is_none_or(|s| s.tick != final_metrics.tick) {
        samples.push(final_metrics.clone());
    }

    info!(
        scenario = state.name(),
        ticks = final_metrics.tick,
        exited_mass = final_metrics.exited_mass,
        active_mass = final_metrics.active_mass,
        completions = final_metrics.completions,
        lot_full_stalled = final_metrics.lot_full_stalled,
        delay_hours = final_metrics.delay_hours.total(),
        "Simulation finished"
    );

    Ok(RunReport {
        scenario: state.name().to_owned(),
        ticks: final_metrics.tick,
        final_metrics,
        samples,
    })
}

/// Build and run one scenario for its configured duration.
///
/// # Errors
///
/// Returns [`RunnerError::Tick`] if the scenario cannot be built or a tick
/// fails.
pub fn run_scenario(spec: &ScenarioSpec) -> Result<RunReport, RunnerError> {
    let mut state = SimulationState::new(spec).map_err(|source| RunnerError::Tick {
        scenario: spec.name.clone(),
        source: Box::new(source),
    })?;
    run_simulation(&mut state, spec.config.total_ticks(), &mut NoOpObserver)
}

fn empty_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        tick: 0,
        sim_time_s: 0.0,
        injected_mass: 0.0,
        exited_mass: 0.0,
        active_particles: 0,
        active_mass: 0.0,
        delay_hours: corridor_types::DelayBreakdown::default(),
        lots: Vec::new(),
        lane_utilization: 0.0,
        checkpoint_queue_len: 0,
        completions: 0,
        conversions: 0,
        lot_full_stalled: 0,
        stalled_now: 0,
        router_rebuilds: 0,
        substeps: 0,
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// A set of scenarios to run side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSpec {
    /// Scenarios, each with its own configuration and layout.
    pub scenarios: Vec<ScenarioSpec>,
    /// Upper bound on scenarios running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Scenario the others are diffed against. Defaults to the first.
    #[serde(default)]
    pub baseline: Option<String>,
    /// Log level and format for the run as a whole.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_max_concurrency() -> usize {
    2
}

impl ComparisonSpec {
    /// Load a comparison file.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] if the file cannot be read or parsed, or a
    /// scenario's configuration is invalid.
    pub fn from_file(path: &Path) -> Result<Self, RunnerError> {
        let contents = std::fs::read_to_string(path).map_err(ScenarioError::from)?;
        Self::parse(&contents)
    }

    /// Parse and validate a comparison.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] for malformed YAML, an empty scenario list, an
    /// unknown baseline, or an invalid scenario configuration.
    pub fn parse(yaml: &str) -> Result<Self, RunnerError> {
        let spec: Self = serde_yml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check the scenario list and baseline.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] naming the first problem.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.scenarios.is_empty() {
            return Err(RunnerError::EmptyComparison);
        }
        for scenario in &self.scenarios {
            scenario.validate()?;
        }
        self.baseline_name().map(|_| ())
    }

    /// Name of the baseline scenario.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::UnknownBaseline`] or
    /// [`RunnerError::EmptyComparison`].
    pub fn baseline_name(&self) -> Result<&str, RunnerError> {
        match &self.baseline {
            Some(name) => self
                .scenarios
                .iter()
                .find(|s| &s.name == name)
                .map(|s| s.name.as_str())
                .ok_or_else(|| RunnerError::UnknownBaseline { name: name.clone() }),
            None => self
                .scenarios
                .first()
                .map(|s| s.name.as_str())
                .ok_or(RunnerError::EmptyComparison),
        }
    }
}

/// Reports for every scenario plus diffs against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Baseline scenario name.
    pub baseline: String,
    /// One report per scenario, in input order.
    pub reports: Vec<RunReport>,
    /// `scenario - baseline` for every non-baseline scenario.
    pub diffs: Vec<MetricsDiff>,
}

/// Run every scenario of `spec` concurrently and diff against the baseline.
///
/// # Errors
///
/// Returns the first [`RunnerError`] in input order if any scenario fails.
pub async fn compare_scenarios(spec: ComparisonSpec) -> Result<ComparisonReport, RunnerError> {
    spec.validate()?;
    let baseline = spec.baseline_name()?.to_owned();
    let permits = Arc::new(Semaphore::new(spec.max_concurrency.max(1)));

    info!(
        scenarios = spec.scenarios.len(),
        max_concurrency = spec.max_concurrency,
        baseline = %baseline,
        "Comparison starting"
    );

    let mut handles = Vec::with_capacity(spec.scenarios.len());
    for scenario in spec.scenarios {
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(join_error)?;
            let result: Result<RunReport, RunnerError> =
                tokio::task::spawn_blocking(move || run_scenario(&scenario))
                    .await
                    .map_err(join_error)?;
            result
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle.await.map_err(join_error)??;
        reports.push(report);
    }

    let diffs = match reports.iter().find(|r| r.scenario == baseline) {
        Some(base) => reports
            .iter()
            .filter(|r| r.scenario != baseline)
            .map(|r| {
                MetricsDiff::between(
                    &base.scenario,
                    &base.final_metrics,
                    &r.scenario,
                    &r.final_metrics,
                )
            })
            .collect(),
        None => Vec::new(),
    };

    info!(scenarios = reports.len(), "Comparison finished");
    Ok(ComparisonReport {
        baseline,
        reports,
        diffs,
    })
}

#[allow(clippy::needless_pass_by_value)]
fn join_error(e: impl std::fmt::Display) -> RunnerError {
    RunnerError::Join {
        message: e.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const COMPARISON: &str = r#"
max_concurrency: 2
baseline: wide
scenarios:
  - name: wide
    config:
      simulation:
        duration_s: 600.0
      flow:
        cleared_share: 1.0
      checkpoint:
        lanes: 4
    layout: ["S##X", "....", "....", "...."]
  - name: narrow
    config:
      simulation:
        duration_s: 600.0
      flow:
        cleared_share: 1.0
      checkpoint:
        lanes: 1
    layout: ["S##X", "....", "....", "...."]
"#;

    #[test]
    fn comparison_parses_and_names_baseline() {
        let spec = ComparisonSpec::parse(COMPARISON).unwrap();
        assert_eq!(spec.scenarios.len(), 2);
        assert_eq!(spec.baseline_name().unwrap(), "wide");
    }

    #[test]
    fn unknown_baseline_rejected() {
        let yaml = COMPARISON.replace("baseline: wide", "baseline: missing");
        assert!(matches!(
            ComparisonSpec::parse(&yaml),
            Err(RunnerError::UnknownBaseline { .. })
        ));
    }

    #[test]
    fn empty_comparison_rejected() {
        assert!(matches!(
            ComparisonSpec::parse("scenarios: []\n"),
            Err(RunnerError::EmptyComparison)
        ));
    }

    #[test]
    fn run_keeps_final_sample() {
        let spec = ComparisonSpec::parse(COMPARISON).unwrap();
        let report = run_scenario(&spec.scenarios[0]).unwrap();
        assert_eq!(report.ticks, 120);
        assert_eq!(report.samples.last().map(|s| s.tick), Some(120));
        assert_eq!(report.samples.len(), 2);
    }

    #[tokio::test]
    async fn comparison_matches_individual_runs() {
        let spec = ComparisonSpec::parse(COMPARISON).unwrap();
        let alone: Vec<RunReport> = spec
            .scenarios
            .iter()
            .map(|s| run_scenario(s).unwrap())
            .collect();
        let report = compare_scenarios(spec).await.unwrap();
        assert_eq!(report.reports, alone);
        assert_eq!(report.diffs.len(), 1);
        assert_eq!(report.diffs[0].scenario, "narrow");
        assert_eq!(report.baseline, "wide");
    }
}
