//! The tick cycle.
//!
//! [`SimulationState::run_tick`] executes one outer tick in a fixed order:
//!
//! 1. **Routing poll** -- install worker results due this tick
//! 2. **Injection** -- sources emit whole units from their accumulators
//! 3. **Drift** -- CFL sub-steps over every moving particle
//! 4. **Conversion and park release** -- held units become cleared, parked
//!    units return to the road
//! 5. **Service** -- checkpoint lanes complete and refill; completions leave
//! 6. **Admission** -- lot state machine, unless a rebuild is in flight
//! 7. **Rebuild** -- request the dirty lots field, rate-limited
//! 8. **Invariants** -- strict-mode checks
//! 9. **Metrics** -- snapshot for observers
//!
//! No step reads wall-clock time or OS entropy, so a scenario and seed fully
//! determine every tick.

use corridor_ledger::{LedgerError, MassLedger};
use corridor_types::{
    CellIndex, CustomsClass, FieldLabel, LotId, MetricsSnapshot, ParticleId, ParticleState,
    ParticleView, Region,
};
use corridor_world::Grid;
use tracing::{debug, info};

use crate::clock::{ClockError, SECONDS_PER_HOUR, SimClock};
use crate::config::{ConversionMode, CorridorConfig};
use crate::drift::{DriftContext, DriftEngine, DriftParams};
use crate::dwell::{DwellQueue, DwellRecord, ParkQueue, ParkRecord, StochasticConversion, park_dwell};
use crate::invariants::{self, InvariantViolation};
use crate::lots::{LotRegistry, Transition};
use crate::metrics::{MetricsAccumulator, SnapshotContext};
use crate::particles::{ArenaError, ParticleArena, SpawnParams};
use crate::rng;
use crate::routing::{RoutingError, RoutingTables};
use crate::scenario::{ScenarioError, ScenarioSpec, Source, SourceKind};
use crate::service::ServiceLanes;

/// Salt for the cleared-on-arrival draw.
const CLEARED_SALT: u64 = 0x434c_4541_5245_4400;

/// Slack when draining an injection accumulator.
const ACCUMULATOR_EPSILON: f64 = 1e-9;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The scenario could not be built.
    #[error("scenario error: {source}")]
    Scenario {
        /// The scenario error.
        #[from]
        source: ScenarioError,
    },

    /// The clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The clock error.
        #[from]
        source: ClockError,
    },

    /// A routing field could not be computed or installed.
    #[error("routing error: {source}")]
    Routing {
        /// The routing error.
        #[from]
        source: RoutingError,
    },

    /// A strict invariant failed.
    #[error("invariant violated: {source}")]
    Invariant {
        /// The violation.
        #[from]
        source: InvariantViolation,
    },

    /// The mass ledger rejected an entry.
    #[error("ledger error: {source}")]
    Ledger {
        /// The ledger error.
        #[from]
        source: LedgerError,
    },

    /// Particle bookkeeping failed outside drift.
    #[error("particle bookkeeping error: {source}")]
    Arena {
        /// The arena error.
        #[from]
        source: ArenaError,
    },

    /// Units cannot be placed in this cell.
    #[error("cannot inject into cell {cell} ({region:?})")]
    NotInjectable {
        /// Requested cell.
        cell: CellIndex,
        /// Its region.
        region: Region,
    },
}

/// What one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// End-of-tick metrics.
    pub metrics: MetricsSnapshot,
    /// Lot admission transitions applied this tick.
    pub transitions: Vec<Transition>,
    /// Units that left through the checkpoint this tick.
    pub completed: Vec<ParticleId>,
    /// Whether a lots-field rebuild was requested this tick.
    pub rebuild_requested: bool,
}

/// Complete mutable state of one simulation run.
#[derive(Debug)]
pub struct SimulationState {
    name: String,
    config: CorridorConfig,
    grid: Grid,
    clock: SimClock,
    arena: ParticleArena,
    lots: LotRegistry,
    dwell: DwellQueue,
    park: ParkQueue,
    service: ServiceLanes,
    routing: RoutingTables,
    ledger: MassLedger,
    metrics: MetricsAccumulator,
    drift: DriftEngine,
    conversion: Option<StochasticConversion>,
    sources: Vec<Source>,
    accumulators: Vec<f64>,
    injected_count: u64,
    substep_counter: u64,
    last_substeps: u32,
}

impl SimulationState {
    /// Build the initial state of a scenario: geometry, lots, and the first
    /// routing tables.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the scenario is malformed or the routing
    /// tables cannot be built.
    pub fn new(spec: &ScenarioSpec) -> Result<Self, TickError> {
        spec.validate()?;
        let config = spec.config.clone();
        let geometry = spec.build_geometry()?;
        let grid = geometry.grid;
        let lots = LotRegistry::new(
            geometry.lots,
            config.lots.admission_cutoff,
            config.lots.cooldown_s,
        );
        let routing = RoutingTables::new(&grid, &lots, &config.routing)?;
        let conversion = match config.dwell.mode {
            ConversionMode::Deterministic => None,
            ConversionMode::Stochastic => Some(StochasticConversion {
                seed: config.simulation.seed,
                fast_tau_s: config.dwell.fast_tau_s,
                slow_tau_s: config.dwell.slow_tau_s,
                fast_share: config.dwell.fast_share,
            }),
        };
        let lanes = usize::try_from(config.checkpoint.lanes).unwrap_or(usize::MAX);

        info!(
            scenario = %spec.name,
            grid_size = grid.size(),
            lots = lots.len(),
            sources = geometry.sources.len(),
            lanes,
            seed = config.simulation.seed,
            "Simulation state built"
        );

        Ok(Self {
            name: spec.name.clone(),
            clock: SimClock::new(config.simulation.dt_s)?,
            arena: ParticleArena::new(grid.len()),
            dwell: DwellQueue::new(),
            park: ParkQueue::new(),
            service: ServiceLanes::new(lanes),
            ledger: MassLedger::new(),
            metrics: MetricsAccumulator::default(),
            drift: DriftEngine::new(DriftParams::from_config(&config), grid.len()),
            accumulators: vec![0.0; geometry.sources.len()],
            sources: geometry.sources,
            conversion,
            routing,
            lots,
            grid,
            config,
            injected_count: 0,
            substep_counter: 0,
            last_substeps: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run configuration.
    pub const fn config(&self) -> &CorridorConfig {
        &self.config
    }

    /// Static geometry.
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Simulated clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Live particles.
    pub const fn arena(&self) -> &ParticleArena {
        &self.arena
    }

    /// Lot states.
    pub const fn lots(&self) -> &LotRegistry {
        &self.lots
    }

    /// Checkpoint lanes and queue.
    pub const fn service(&self) -> &ServiceLanes {
        &self.service
    }

    /// Installed routing fields.
    pub const fn routing(&self) -> &RoutingTables {
        &self.routing
    }

    /// Mass ledger.
    pub const fn ledger(&self) -> &MassLedger {
        &self.ledger
    }

    /// Cumulative counters.
    pub const fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    /// Rendering view of every live particle, in slot order.
    pub fn particle_views(&self) -> Vec<ParticleView> {
        self.arena.views()
    }

    // -----------------------------------------------------------------------
    // External control
    // -----------------------------------------------------------------------

    /// Place one unit of `class` in `cell` outside the source schedule.
    ///
    /// `state` must be [`ParticleState::Road`] or [`ParticleState::Park`];
    /// parked units get a park dwell like source-injected ones.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::NotInjectable`] for a cell that is not road or
    /// park, or for any other initial state.
    pub fn inject(
        &mut self,
        cell: CellIndex,
        class: CustomsClass,
        state: ParticleState,
    ) -> Result<ParticleId, TickError> {
        let region = self.grid.region(cell);
        let placeable = matches!(
            (state, region),
            (ParticleState::Road, Region::Road | Region::Park) | (ParticleState::Park, Region::Park)
        );
        if !placeable {
            return Err(TickError::NotInjectable { cell, region });
        }
        self.spawn_unit(self.clock.tick(), self.clock.now_s(), cell, class, state)
    }

    /// Request a rebuild of `label` immediately, bypassing the dirty flag
    /// and rate limit.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::Routing`] if the request fails.
    pub fn request_rebuild(&mut self, label: FieldLabel) -> Result<u64, TickError> {
        Ok(self
            .routing
            .request(label, self.clock.tick(), &self.grid, &self.lots)?)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Execute one tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] on any routing, bookkeeping or invariant
    /// failure. The state must not be ticked again after an error.
    pub fn run_tick(&mut self) -> Result<TickOutcome, TickError> {
        let tick = self
            .clock
            .tick()
            .checked_add(1)
            .ok_or(ClockError::TickOverflow)?;
        let dt = self.clock.dt_s();
        let start = self.clock.time_at(tick - 1);
        let end = self.clock.time_at(tick);
        let hour = SimClock::hour_of_day(start);

        self.routing.poll(tick)?;
        self.inject_sources(tick, start, hour)?;

        let service_time = self.config.checkpoint.service_time_at(hour);
        self.drift_all(tick, start, dt, service_time.is_some())?;

        self.convert_held(tick, end, dt);
        self.release_parked(end);

        let completed = self.serve(tick, start, end, service_time)?;

        let mut transitions = Vec::new();
        if !self.routing.in_flight() {
            let update = self.lots.update(end);
            if update.needs_rebuild() {
                self.routing.mark_dirty();
            }
            transitions = update.transitions;
        }

        let rebuild_requested = self.routing.maybe_rebuild(end, tick, &self.grid, &self.lots)?;

        if self.config.simulation.strict_invariants {
            invariants::check_all(tick, &self.arena, &self.lots, &self.ledger)?;
        }

        self.clock.advance()?;
        let metrics = self.metrics.snapshot(&SnapshotContext {
            tick,
            sim_time_s: end,
            arena: &self.arena,
            lots: &self.lots,
            service: &self.service,
            ledger: &self.ledger,
            router_rebuilds: self.routing.rebuilds(),
            substeps: self.last_substeps,
        });

        debug!(
            tick,
            active = metrics.active_particles,
            queue = metrics.checkpoint_queue_len,
            completed = completed.len(),
            substeps = self.last_substeps,
            "Tick complete"
        );

        Ok(TickOutcome {
            metrics,
            transitions,
            completed,
            rebuild_requested,
        })
    }

    fn spawn_unit(
        &mut self,
        tick: u64,
        time_s: f64,
        cell: CellIndex,
        class: CustomsClass,
        state: ParticleState,
    ) -> Result<ParticleId, TickError> {
        let mass = self.config.flow.unit_mass;
        let id = self.arena.spawn(SpawnParams {
            cell,
            position: self.grid.center(cell),
            mass,
            class,
            state,
        })?;
        self.ledger.record_injection(tick, id, mass)?;
        self.injected_count += 1;

        if state == ParticleState::Park {
            let park = &self.config.park;
            self.park.push(ParkRecord {
                particle: id,
                arrival_s: time_s,
                required_s: park_dwell(
                    self.config.simulation.seed,
                    id,
                    park.short_dwell_s,
                    park.long_dwell_s,
                    park.long_share,
                ),
            });
        }
        Ok(id)
    }

    fn inject_sources(&mut self, tick: u64, start: f64, hour: usize) -> Result<(), TickError> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let flow = &self.config.flow;
        let rate = flow.inflow_by_hour.get(hour).copied().unwrap_or(0.0);
        let unit = flow.unit_mass;
        let cleared_share = flow.cleared_share;
        #[allow(clippy::cast_precision_loss)]
        let per_source = rate * self.clock.dt_s() / SECONDS_PER_HOUR / self.sources.len() as f64;

        for index in 0..self.sources.len() {
            let (Some(source), Some(acc)) = (
                self.sources.get(index).copied(),
                self.accumulators.get_mut(index),
            ) else {
                continue;
            };
            *acc += per_source;
            let mut due = 0_u32;
            while *acc >= unit - ACCUMULATOR_EPSILON {
                *acc -= unit;
                due += 1;
            }

            for _ in 0..due {
                let draw = rng::unit(self.config.simulation.seed ^ CLEARED_SALT, self.injected_count, 0);
                let class = if draw < cleared_share {
                    CustomsClass::Cleared
                } else {
                    CustomsClass::Restricted
                };
                let state = match source.kind {
                    SourceKind::Road => ParticleState::Road,
                    SourceKind::Park => ParticleState::Park,
                };
                self.spawn_unit(tick, start, source.cell, class, state)?;
            }
        }
        Ok(())
    }

    fn drift_all(
        &mut self,
        tick: u64,
        start: f64,
        dt: f64,
        checkpoint_open: bool,
    ) -> Result<(), TickError> {
        let n_sub = self.drift.params().substeps(dt);
        let sub_dt = dt / f64::from(n_sub);
        for k in 0..n_sub {
            let mut ctx = DriftContext {
                grid: &self.grid,
                arena: &mut self.arena,
                lots: &mut self.lots,
                routing: &self.routing,
                service: &mut self.service,
                dwell: &mut self.dwell,
                metrics: &mut self.metrics,
                checkpoint_open,
                tick,
                time_s: f64::from(k).mul_add(sub_dt, start),
                substep: self.substep_counter,
            };
            self.drift.substep(&mut ctx, sub_dt)?;
            self.substep_counter += 1;
        }
        self.last_substeps = n_sub;
        Ok(())
    }

    fn convert_held(&mut self, tick: u64, now_s: f64, dt: f64) {
        let arena = &self.arena;
        let is_held = |lot: LotId, particle: ParticleId| {
            arena
                .get(particle)
                .is_some_and(|p| p.state == ParticleState::Lot && p.lot == Some(lot))
        };

        let records: Vec<DwellRecord> = match self.conversion {
            None => self
                .dwell
                .drain_eligible(now_s, self.config.dwell.min_dwell_s, is_held),
            Some(model) => {
                let unit = self.config.flow.unit_mass;
                let mut out = Vec::new();
                for lot in self.lots.iter() {
                    let held = (lot.occupied() / unit).round();
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let held_units = held.max(0.0) as u64;
                    let count = model.sample(lot.id, tick, held_units, dt);
                    if count > 0 {
                        let count = usize::try_from(count).unwrap_or(usize::MAX);
                        out.extend(self.dwell.take_oldest(lot.id, count, is_held));
                    }
                }
                out
            }
        };

        for record in records {
            let Some(particle) = self.arena.get_mut(record.particle) else {
                continue;
            };
            particle.class = CustomsClass::Cleared;
            particle.state = ParticleState::Road;
            particle.lot = None;
            particle.dwell_start_s = None;
            particle.stall = None;
            particle.stall_s = 0.0;
            let mass = particle.mass;
            self.lots.release(record.lot, mass);
            self.metrics.conversions += 1;
        }
    }

    fn release_parked(&mut self, now_s: f64) {
        let arena = &self.arena;
        let released = self.park.release_due(now_s, |particle| {
            arena
                .get(particle)
                .is_some_and(|p| p.state == ParticleState::Park)
        });
        for id in released {
            if let Some(particle) = self.arena.get_mut(id) {
                particle.state = ParticleState::Road;
                self.metrics.park_releases += 1;
            }
        }
    }

    fn serve(
        &mut self,
        tick: u64,
        start: f64,
        end: f64,
        service_time: Option<f64>,
    ) -> Result<Vec<ParticleId>, TickError> {
        let arena = &self.arena;
        let step = self.service.step(start, end, service_time, |particle| {
            arena
                .get(particle)
                .is_some_and(|p| p.state == ParticleState::Cleared && !p.in_service)
        });

        for id in &step.started {
            if let Some(particle) = self.arena.get_mut(*id) {
                particle.in_service = true;
            }
        }
        for id in &step.completed {
            if let Some(particle) = self.arena.get_mut(*id) {
                particle.state = ParticleState::Departing;
            }
            self.arena.remove(*id)?;
            self.ledger.record_exit(tick, *id)?;
            self.metrics.completions += 1;
        }
        Ok(step.completed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec(yaml_config: &str, layout: &[&str]) -> ScenarioSpec {
        let config = if yaml_config.is_empty() {
            CorridorConfig::default()
        } else {
            CorridorConfig::parse(yaml_config).unwrap()
        };
        ScenarioSpec {
            name: "unit".to_owned(),
            config,
            layout: layout.iter().map(|r| (*r).to_owned()).collect(),
            lots: Vec::new(),
        }
    }

    #[test]
    fn injection_accumulates_fractional_units() {
        // 36 units/hour over 1 s ticks is 0.01 units per tick.
        let config = "simulation:\n  dt_s: 1.0\nflow:\n  inflow_by_hour: [36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36]\n";
        let mut state = SimulationState::new(&spec(config, &["S..", "#..", "X.."])).unwrap();
        for _ in 0..99 {
            state.run_tick().unwrap();
        }
        assert!(state.ledger().injected().abs() < f64::EPSILON);
        state.run_tick().unwrap();
        assert!((state.ledger().injected() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cleared_unit_is_served_and_leaves() {
        let config = "simulation:\n  dt_s: 5.0\nflow:\n  inflow_by_hour: [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]\ncheckpoint:\n  lanes: 1\n  service_time_s: 30.0\n";
        let mut state = SimulationState::new(&spec(config, &["#X", ".."])).unwrap();
        let id = state
            .inject(CellIndex(0), CustomsClass::Cleared, ParticleState::Road)
            .unwrap();
        let mut left_at = None;
        for _ in 0..200 {
            let outcome = state.run_tick().unwrap();
            if outcome.completed.contains(&id) {
                left_at = Some(outcome.metrics.tick);
                break;
            }
        }
        assert!(left_at.is_some());
        assert!(state.arena().is_empty());
        assert!((state.ledger().exited() - 1.0).abs() < f64::EPSILON);
        assert_eq!(state.metrics().completions, 1);
    }

    #[test]
    fn cannot_inject_into_checkpoint() {
        let mut state = SimulationState::new(&spec("", &["#X", ".."])).unwrap();
        let result = state.inject(CellIndex(1), CustomsClass::Cleared, ParticleState::Road);
        assert!(matches!(result, Err(TickError::NotInjectable { .. })));
        let result = state.inject(CellIndex(0), CustomsClass::Cleared, ParticleState::Lot);
        assert!(matches!(result, Err(TickError::NotInjectable { .. })));
    }

    #[test]
    fn parked_unit_is_released_after_dwell() {
        let config = "flow:\n  inflow_by_hour: [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]\npark:\n  short_dwell_s: 60.0\n  long_share: 0.0\n";
        let mut state = SimulationState::new(&spec(config, &["P#X", "...", "..."])).unwrap();
        let id = state
            .inject(CellIndex(0), CustomsClass::Cleared, ParticleState::Park)
            .unwrap();
        for _ in 0..11 {
            state.run_tick().unwrap();
        }
        assert_eq!(state.arena().get(id).map(|p| p.state), Some(ParticleState::Park));
        state.run_tick().unwrap();
        assert_ne!(state.arena().get(id).map(|p| p.state), Some(ParticleState::Park));
        assert_eq!(state.metrics().park_releases, 1);
    }
}
