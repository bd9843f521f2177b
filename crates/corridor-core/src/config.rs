//! Configuration loading and typed config structures for the corridor
//! simulation.
//!
//! A scenario file embeds one [`CorridorConfig`]; every field has a default so
//! a scenario only spells out what it changes. [`CorridorConfig::validate`]
//! rejects values the engine cannot run with before any tick executes.

use std::path::Path;

use corridor_world::RouterParams;
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside the range the engine supports.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorridorConfig {
    /// Seed, tick length, duration and invariant mode.
    #[serde(default)]
    pub simulation: SimulationSection,

    /// Inflow profile and source behavior.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Speed, road capacity and congestion response.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Router constants and rebuild scheduling.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Lot admission cutoff and cooldown.
    #[serde(default)]
    pub lots: LotsConfig,

    /// Storage dwell and customs conversion.
    #[serde(default)]
    pub dwell: DwellConfig,

    /// Holding-area release.
    #[serde(default)]
    pub park: ParkConfig,

    /// Checkpoint lanes and service time.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CorridorConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value the engine depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        positive("simulation.dt_s", sim.dt_s)?;
        positive("simulation.duration_s", sim.duration_s)?;
        if !(sim.cfl > 0.0 && sim.cfl < 1.0) {
            return invalid("simulation.cfl", format!("must be in (0, 1), got {}", sim.cfl));
        }
        if sim.sample_every_ticks == 0 {
            return invalid("simulation.sample_every_ticks", "must be at least 1".to_owned());
        }

        positive("flow.unit_mass", self.flow.unit_mass)?;
        hourly("flow.inflow_by_hour", &self.flow.inflow_by_hour)?;
        share("flow.cleared_share", self.flow.cleared_share)?;

        let t = &self.transport;
        positive("transport.cell_size_m", t.cell_size_m)?;
        positive("transport.speed_mps", t.speed_mps)?;
        positive("transport.road_cap_units", t.road_cap_units)?;
        positive("transport.critical_density", t.critical_density)?;
        if !(0.0..1.0).contains(&t.jitter_amplitude) {
            return invalid(
                "transport.jitter_amplitude",
                format!("must be in [0, 1), got {}", t.jitter_amplitude),
            );
        }
        non_negative("transport.backtrack_after_s", t.backtrack_after_s)?;
        non_negative("transport.intersection.friction", t.intersection.friction)?;
        positive("transport.intersection.cycle_s", t.intersection.cycle_s)?;
        if !(0.0..t.intersection.cycle_s).contains(&t.intersection.red_s) {
            return invalid(
                "transport.intersection.red_s",
                "must be non-negative and shorter than cycle_s".to_owned(),
            );
        }

        self.routing
            .router_params()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                field: "routing",
                reason: e.to_string(),
            })?;
        non_negative("routing.rebuild_min_interval_s", self.routing.rebuild_min_interval_s)?;

        if !(self.lots.admission_cutoff > 0.0 && self.lots.admission_cutoff <= 1.0) {
            return invalid(
                "lots.admission_cutoff",
                format!("must be in (0, 1], got {}", self.lots.admission_cutoff),
            );
        }
        non_negative("lots.cooldown_s", self.lots.cooldown_s)?;

        non_negative("dwell.min_dwell_s", self.dwell.min_dwell_s)?;
        positive("dwell.fast_tau_s", self.dwell.fast_tau_s)?;
        positive("dwell.slow_tau_s", self.dwell.slow_tau_s)?;
        share("dwell.fast_share", self.dwell.fast_share)?;

        non_negative("park.short_dwell_s", self.park.short_dwell_s)?;
        non_negative("park.long_dwell_s", self.park.long_dwell_s)?;
        share("park.long_share", self.park.long_share)?;

        if self.checkpoint.lanes == 0 {
            return invalid("checkpoint.lanes", "must be at least 1".to_owned());
        }
        positive("checkpoint.service_time_s", self.checkpoint.service_time_s)?;
        if let Some(profile) = &self.checkpoint.capacity_by_hour {
            hourly("checkpoint.capacity_by_hour", profile)?;
        }
        Ok(())
    }

    /// Number of ticks covering `simulation.duration_s`.
    pub fn total_ticks(&self) -> u64 {
        let ticks = (self.simulation.duration_s / self.simulation.dt_s).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ticks = ticks.max(0.0) as u64;
        ticks
    }
}

fn invalid(field: &'static str, reason: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { field, reason })
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        invalid(field, format!("must be positive, got {value}"))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        invalid(field, format!("must be non-negative, got {value}"))
    }
}

fn share(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(field, format!("must be in [0, 1], got {value}"))
    }
}

fn hourly(field: &'static str, profile: &[f64]) -> Result<(), ConfigError> {
    if profile.len() != 24 {
        return invalid(field, format!("needs 24 hourly values, got {}", profile.len()));
    }
    for &value in profile {
        non_negative(field, value)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Seed, timing and invariant mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Seed for every stochastic element.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Outer tick length in simulated seconds.
    #[serde(default = "default_dt_s")]
    pub dt_s: f64,

    /// Simulated duration of a run, in seconds.
    #[serde(default = "default_duration_s")]
    pub duration_s: f64,

    /// Maximum displacement per sub-step, as a fraction of one cell.
    #[serde(default = "default_cfl")]
    pub cfl: f64,

    /// Check every invariant after every tick and abort on violation.
    #[serde(default = "default_true")]
    pub strict_invariants: bool,

    /// Keep a metrics sample every N ticks.
    #[serde(default = "default_sample_every_ticks")]
    pub sample_every_ticks: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            dt_s: default_dt_s(),
            duration_s: default_duration_s(),
            cfl: default_cfl(),
            strict_invariants: true,
            sample_every_ticks: default_sample_every_ticks(),
        }
    }
}

/// Inflow profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Mass of one truck-unit.
    #[serde(default = "default_unit_mass")]
    pub unit_mass: f64,

    /// Mass per hour entering across all sources, by hour of day.
    #[serde(default = "default_inflow_by_hour")]
    pub inflow_by_hour: Vec<f64>,

    /// Share of injected units that arrive already cleared.
    #[serde(default)]
    pub cleared_share: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            unit_mass: default_unit_mass(),
            inflow_by_hour: default_inflow_by_hour(),
            cleared_share: 0.0,
        }
    }
}

/// Intersection stop/go heuristic for high-friction cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionConfig {
    /// Commuter friction assigned to intersection cells (`=` in layouts).
    /// Cells at or above this friction run the red window.
    #[serde(default = "default_intersection_friction")]
    pub friction: f64,

    /// Signal cycle length in seconds.
    #[serde(default = "default_cycle_s")]
    pub cycle_s: f64,

    /// Red portion of each cycle in seconds.
    #[serde(default = "default_red_s")]
    pub red_s: f64,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            friction: default_intersection_friction(),
            cycle_s: default_cycle_s(),
            red_s: default_red_s(),
        }
    }
}

/// Vehicle motion and congestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Cell width in meters.
    #[serde(default = "default_cell_size_m")]
    pub cell_size_m: f64,

    /// Free-flow speed in meters per second.
    #[serde(default = "default_speed_mps")]
    pub speed_mps: f64,

    /// Road cell mass cap, in truck-units.
    #[serde(default = "default_road_cap_units")]
    pub road_cap_units: f64,

    /// Density at which speed halves.
    #[serde(default = "default_critical_density")]
    pub critical_density: f64,

    /// Per-particle speed jitter amplitude in `[0, 1)`.
    #[serde(default = "default_jitter_amplitude")]
    pub jitter_amplitude: f64,

    /// Seconds a lot-blocked particle waits before it may backtrack.
    #[serde(default = "default_backtrack_after_s")]
    pub backtrack_after_s: f64,

    /// Intersection heuristic.
    #[serde(default)]
    pub intersection: IntersectionConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            cell_size_m: default_cell_size_m(),
            speed_mps: default_speed_mps(),
            road_cap_units: default_road_cap_units(),
            critical_density: default_critical_density(),
            jitter_amplitude: default_jitter_amplitude(),
            backtrack_after_s: default_backtrack_after_s(),
            intersection: IntersectionConfig::default(),
        }
    }
}

/// Where router rebuilds run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    /// Compute on the tick thread as soon as a rebuild is due.
    #[default]
    Inline,
    /// Compute on the background router thread.
    Worker,
}

/// Router constants and rebuild scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Base potential of every seed.
    #[serde(default = "default_seed_cost")]
    pub seed_cost: f64,

    /// Seed bias per unit of lot utilization.
    #[serde(default)]
    pub bias_weight: f64,

    /// Lot penalty scale.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Lot penalty exponent.
    #[serde(default = "default_beta")]
    pub beta: f64,

    /// Conductance below which a cell is impassable.
    #[serde(default = "default_conductance_threshold")]
    pub conductance_threshold: f64,

    /// Minimum simulated seconds between rebuilds.
    #[serde(default = "default_rebuild_min_interval_s")]
    pub rebuild_min_interval_s: f64,

    /// Inline or background rebuilds.
    #[serde(default)]
    pub mode: RouterMode,

    /// In worker mode, ticks between a request and installing its result.
    #[serde(default = "default_apply_after_ticks")]
    pub apply_after_ticks: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            seed_cost: default_seed_cost(),
            bias_weight: 0.0,
            alpha: default_alpha(),
            beta: default_beta(),
            conductance_threshold: default_conductance_threshold(),
            rebuild_min_interval_s: default_rebuild_min_interval_s(),
            mode: RouterMode::Inline,
            apply_after_ticks: default_apply_after_ticks(),
        }
    }
}

impl RoutingConfig {
    /// The router constants as the field router expects them.
    pub const fn router_params(&self) -> RouterParams {
        RouterParams {
            seed_cost: self.seed_cost,
            bias_weight: self.bias_weight,
            alpha: self.alpha,
            beta: self.beta,
            conductance_threshold: self.conductance_threshold,
        }
    }
}

/// Lot admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotsConfig {
    /// Fill ratio at which a lot stops admitting.
    #[serde(default = "default_admission_cutoff")]
    pub admission_cutoff: f64,

    /// Seconds an emptied lot waits before admitting again.
    #[serde(default = "default_cooldown_s")]
    pub cooldown_s: f64,
}

impl Default for LotsConfig {
    fn default() -> Self {
        Self {
            admission_cutoff: default_admission_cutoff(),
            cooldown_s: default_cooldown_s(),
        }
    }
}

/// How held mass converts to the cleared class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// First-arrived converts first once `min_dwell_s` has elapsed.
    #[default]
    Deterministic,
    /// Two-population binomial sampling with seeded draws.
    Stochastic,
}

/// Storage dwell and conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellConfig {
    /// Conversion model.
    #[serde(default)]
    pub mode: ConversionMode,

    /// Minimum dwell before a held unit may convert (deterministic mode).
    #[serde(default = "default_min_dwell_s")]
    pub min_dwell_s: f64,

    /// Characteristic dwell of the fast population (stochastic mode).
    #[serde(default = "default_fast_tau_s")]
    pub fast_tau_s: f64,

    /// Characteristic dwell of the slow population (stochastic mode).
    #[serde(default = "default_slow_tau_s")]
    pub slow_tau_s: f64,

    /// Share of held mass in the fast population.
    #[serde(default = "default_fast_share")]
    pub fast_share: f64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            mode: ConversionMode::Deterministic,
            min_dwell_s: default_min_dwell_s(),
            fast_tau_s: default_fast_tau_s(),
            slow_tau_s: default_slow_tau_s(),
            fast_share: default_fast_share(),
        }
    }
}

/// Holding-area release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkConfig {
    /// Default dwell before release.
    #[serde(default = "default_short_dwell_s")]
    pub short_dwell_s: f64,

    /// Dwell for the long tier.
    #[serde(default = "default_long_dwell_s")]
    pub long_dwell_s: f64,

    /// Share of park arrivals assigned to the long tier.
    #[serde(default = "default_long_share")]
    pub long_share: f64,
}

impl Default for ParkConfig {
    fn default() -> Self {
        Self {
            short_dwell_s: default_short_dwell_s(),
            long_dwell_s: default_long_dwell_s(),
            long_share: default_long_share(),
        }
    }
}

/// Checkpoint service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Number of parallel service lanes.
    #[serde(default = "default_lanes")]
    pub lanes: u32,

    /// Seconds to serve one unit when no hourly profile is set.
    #[serde(default = "default_service_time_s")]
    pub service_time_s: f64,

    /// Units served per hour across all lanes, by hour of day. A zero hour
    /// closes the checkpoint.
    #[serde(default)]
    pub capacity_by_hour: Option<Vec<f64>>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            service_time_s: default_service_time_s(),
            capacity_by_hour: None,
        }
    }
}

impl CheckpointConfig {
    /// Service time per unit during `hour`, or `None` when the checkpoint is
    /// closed.
    pub fn service_time_at(&self, hour: usize) -> Option<f64> {
        match &self.capacity_by_hour {
            None => Some(self.service_time_s),
            Some(profile) => {
                let capacity = profile.get(hour % 24).copied().unwrap_or(0.0);
                (capacity > 0.0).then(|| f64::from(self.lanes) * 3600.0 / capacity)
            }
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_seed() -> u64 {
    42
}

const fn default_dt_s() -> f64 {
    5.0
}

const fn default_duration_s() -> f64 {
    86_400.0
}

const fn default_cfl() -> f64 {
    0.9
}

const fn default_true() -> bool {
    true
}

const fn default_sample_every_ticks() -> u64 {
    60
}

const fn default_unit_mass() -> f64 {
    1.0
}

fn default_inflow_by_hour() -> Vec<f64> {
    vec![
        20.0, 15.0, 12.0, 10.0, 12.0, 20.0, 35.0, 50.0, 60.0, 65.0, 65.0, 60.0, 55.0, 55.0, 60.0,
        60.0, 55.0, 50.0, 40.0, 35.0, 30.0, 28.0, 25.0, 22.0,
    ]
}

const fn default_intersection_friction() -> f64 {
    0.6
}

const fn default_cycle_s() -> f64 {
    90.0
}

const fn default_red_s() -> f64 {
    30.0
}

const fn default_cell_size_m() -> f64 {
    200.0
}

const fn default_speed_mps() -> f64 {
    12.0
}

const fn default_road_cap_units() -> f64 {
    8.0
}

const fn default_critical_density() -> f64 {
    0.6
}

const fn default_jitter_amplitude() -> f64 {
    0.1
}

const fn default_backtrack_after_s() -> f64 {
    300.0
}

const fn default_seed_cost() -> f64 {
    0.01
}

const fn default_alpha() -> f64 {
    8.0
}

const fn default_beta() -> f64 {
    4.0
}

const fn default_conductance_threshold() -> f64 {
    0.01
}

const fn default_rebuild_min_interval_s() -> f64 {
    300.0
}

const fn default_apply_after_ticks() -> u64 {
    1
}

const fn default_admission_cutoff() -> f64 {
    0.9
}

const fn default_cooldown_s() -> f64 {
    1800.0
}

const fn default_min_dwell_s() -> f64 {
    4.0 * 3600.0
}

const fn default_fast_tau_s() -> f64 {
    2.0 * 3600.0
}

const fn default_slow_tau_s() -> f64 {
    10.0 * 3600.0
}

const fn default_fast_share() -> f64 {
    0.7
}

const fn default_short_dwell_s() -> f64 {
    1800.0
}

const fn default_long_dwell_s() -> f64 {
    6.0 * 3600.0
}

const fn default_long_share() -> f64 {
    0.2
}

const fn default_lanes() -> u32 {
    4
}

const fn default_service_time_s() -> f64 {
    240.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = CorridorConfig::parse("{}").unwrap();
        assert_eq!(config, CorridorConfig::default());
        assert_eq!(config.checkpoint.lanes, 4);
        assert_eq!(config.flow.inflow_by_hour.len(), 24);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "
simulation:
  seed: 7
  dt_s: 2.0
checkpoint:
  lanes: 6
routing:
  mode: worker
";
        let config = CorridorConfig::parse(yaml).unwrap();
        assert_eq!(config.simulation.seed, 7);
        assert!((config.simulation.dt_s - 2.0).abs() < f64::EPSILON);
        assert!((config.simulation.cfl - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.checkpoint.lanes, 6);
        assert_eq!(config.routing.mode, RouterMode::Worker);
    }

    #[test]
    fn zero_lanes_rejected() {
        let result = CorridorConfig::parse("checkpoint:\n  lanes: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "checkpoint.lanes",
                ..
            })
        ));
    }

    #[test]
    fn cfl_must_be_below_one() {
        assert!(CorridorConfig::parse("simulation:\n  cfl: 1.5\n").is_err());
    }

    #[test]
    fn short_inflow_profile_rejected() {
        assert!(CorridorConfig::parse("flow:\n  inflow_by_hour: [1.0, 2.0]\n").is_err());
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        assert!(matches!(
            CorridorConfig::parse("simulation: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn hourly_capacity_sets_service_time_and_closures() {
        let mut profile = vec![120.0; 24];
        profile[3] = 0.0;
        let checkpoint = CheckpointConfig {
            lanes: 4,
            service_time_s: 60.0,
            capacity_by_hour: Some(profile),
        };
        let at_noon = checkpoint.service_time_at(12).unwrap();
        assert!((at_noon - 120.0).abs() < 1e-9);
        assert!(checkpoint.service_time_at(3).is_none());
    }

    #[test]
    fn total_ticks_rounds_up() {
        let mut config = CorridorConfig::default();
        config.simulation.duration_s = 10.5;
        config.simulation.dt_s = 1.0;
        assert_eq!(config.total_ticks(), 11);
    }
}
