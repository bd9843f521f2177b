//! Particle drift along the routing fields.
//!
//! One call to [`DriftEngine::substep`] advances every moving particle by
//! one CFL sub-step in two passes:
//!
//! 1. **Tally.** Every road particle's intended crossing `(cell, direction)`
//!    is summed by mass. A particle heading into cell `n` discounts the mass
//!    in `n` that is about to cross the other way.
//! 2. **Move.** Particles are visited in arena slot order. Each one looks up
//!    its next hop in the field for its class, passes the lot and road
//!    capacity gates (rerouting to another downhill neighbor when one exists),
//!    then moves at free-flow speed scaled by the congestion response and its
//!    jitter. Crossing into a lot is gated again by the admission check at
//!    the boundary.
//!
//! Every time-weighted quantity (age, stall time, delay hours) is scaled by
//! the sub-step length so totals do not depend on the outer tick length.

use corridor_types::{
    CellIndex, CustomsClass, DelayCause, FieldLabel, LotId, ParticleId, ParticleState, Region,
    StallReason,
};
use corridor_world::{Direction, FieldResult, Grid};

use crate::clock::SECONDS_PER_HOUR;
use crate::config::CorridorConfig;
use crate::congestion;
use crate::dwell::{DwellQueue, DwellRecord};
use crate::invariants::InvariantViolation;
use crate::lots::LotRegistry;
use crate::metrics::MetricsAccumulator;
use crate::particles::ParticleArena;
use crate::routing::RoutingTables;
use crate::service::ServiceLanes;

/// Slack on the CFL comparison.
const CFL_EPSILON: f64 = 1e-9;

/// Motion constants resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftParams {
    /// Run seed.
    pub seed: u64,
    /// Free-flow speed in m/s.
    pub speed_mps: f64,
    /// Cell width in m.
    pub cell_size_m: f64,
    /// Road cell mass cap.
    pub road_cap_mass: f64,
    /// Density at which speed halves.
    pub critical_density: f64,
    /// Speed jitter amplitude.
    pub jitter_amplitude: f64,
    /// Lot-blocked stall time before backtracking is allowed.
    pub backtrack_after_s: f64,
    /// Friction at or above which a cell runs the red window.
    pub intersection_friction: f64,
    /// Signal cycle.
    pub cycle_s: f64,
    /// Red portion of the cycle.
    pub red_s: f64,
    /// Maximum displacement per sub-step in cells.
    pub cfl: f64,
    /// Mass of one truck-unit.
    pub unit_mass: f64,
    /// Router impassability threshold.
    pub conductance_threshold: f64,
}

impl DriftParams {
    /// Resolve from a validated configuration.
    pub fn from_config(config: &CorridorConfig) -> Self {
        let t = &config.transport;
        Self {
            seed: config.simulation.seed,
            speed_mps: t.speed_mps,
            cell_size_m: t.cell_size_m,
            road_cap_mass: t.road_cap_units * config.flow.unit_mass,
            critical_density: t.critical_density,
            jitter_amplitude: t.jitter_amplitude,
            backtrack_after_s: t.backtrack_after_s,
            intersection_friction: t.intersection.friction,
            cycle_s: t.intersection.cycle_s,
            red_s: t.intersection.red_s,
            cfl: config.simulation.cfl,
            unit_mass: config.flow.unit_mass,
            conductance_threshold: config.routing.conductance_threshold,
        }
    }

    /// Sub-steps needed so the fastest particle moves at most `cfl` cells
    /// per sub-step over an outer tick of `dt_s`.
    pub fn substeps(&self, dt_s: f64) -> u32 {
        let max_speed = self.speed_mps * (1.0 + self.jitter_amplitude);
        let n = (max_speed * dt_s / (self.cfl * self.cell_size_m)).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = n.clamp(1.0, f64::from(u32::MAX)) as u32;
        n
    }
}

/// Everything one sub-step reads or mutates.
#[derive(Debug)]
pub struct DriftContext<'a> {
    /// Static geometry.
    pub grid: &'a Grid,
    /// Live particles.
    pub arena: &'a mut ParticleArena,
    /// Lot admission.
    pub lots: &'a mut LotRegistry,
    /// Installed fields.
    pub routing: &'a RoutingTables,
    /// Checkpoint queue; cleared arrivals are enqueued here.
    pub service: &'a mut ServiceLanes,
    /// Conversion queue; admissions are recorded here.
    pub dwell: &'a mut DwellQueue,
    /// Run counters.
    pub metrics: &'a mut MetricsAccumulator,
    /// Whether the checkpoint is servicing this tick.
    pub checkpoint_open: bool,
    /// Tick being executed.
    pub tick: u64,
    /// Simulated time at the start of the sub-step.
    pub time_s: f64,
    /// Global sub-step counter, used to key jitter draws.
    pub substep: u64,
}

/// Outcome of a particle's attempt to cross into `next`.
enum Crossing {
    Stay,
    Entered,
    Admitted(LotId),
    Arrived,
    Refused(StallReason),
}

/// Two-pass mover with reusable scratch space.
#[derive(Debug, Clone)]
pub struct DriftEngine {
    params: DriftParams,
    /// Mass intending to cross each directed edge, indexed `cell * 4 + dir`.
    crossings: Vec<f64>,
}

/// The field a particle of `class` follows.
pub const fn field_label(class: CustomsClass, checkpoint_open: bool) -> FieldLabel {
    match class {
        CustomsClass::Restricted => FieldLabel::Lots,
        CustomsClass::Cleared if checkpoint_open => FieldLabel::Checkpoint,
        CustomsClass::Cleared => FieldLabel::CheckpointClosed,
    }
}

impl DriftEngine {
    /// Create an engine for a grid of `cells` cells.
    pub fn new(params: DriftParams, cells: usize) -> Self {
        Self {
            params,
            crossings: vec![0.0; cells * 4],
        }
    }

    /// Motion constants.
    pub const fn params(&self) -> &DriftParams {
        &self.params
    }

    /// Advance every particle by one sub-step of `dt_s` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::Cfl`] if a displacement exceeds the
    /// bound, or [`InvariantViolation::Bookkeeping`] if the arena rejects a
    /// move.
    pub fn substep(&mut self, ctx: &mut DriftContext<'_>, dt_s: f64) -> Result<(), InvariantViolation> {
        self.tally(ctx);
        for id in ctx.arena.ids() {
            self.advance(ctx, id, dt_s)?;
        }
        Ok(())
    }

    fn tally(&mut self, ctx: &DriftContext<'_>) {
        self.crossings.iter_mut().for_each(|m| *m = 0.0);
        for particle in ctx.arena.iter() {
            if !particle.state.is_moving() {
                continue;
            }
            let cell = particle.cell();
            let field = ctx
                .routing
                .field(field_label(particle.class, ctx.checkpoint_open));
            let Some(next) = field.next_hop(cell) else {
                continue;
            };
            if let Some(dir) = ctx.grid.direction_between(cell, next)
                && let Some(slot) = self.crossings.get_mut(cell.get() * 4 + dir.index())
            {
                *slot += particle.mass;
            }
        }
    }

    fn oncoming(&self, next: CellIndex, dir: Direction) -> f64 {
        self.crossings
            .get(next.get() * 4 + dir.opposite().index())
            .copied()
            .unwrap_or(0.0)
    }

    fn advance(
        &self,
        ctx: &mut DriftContext<'_>,
        id: ParticleId,
        dt_s: f64,
    ) -> Result<(), InvariantViolation> {
        let Some(particle) = ctx.arena.get_mut(id) else {
            return Ok(());
        };
        particle.age_s += dt_s;
        if particle.stall.is_some() {
            particle.stall_s += dt_s;
        }
        let units = particle.mass / self.params.unit_mass;
        let hours = units * dt_s / SECONDS_PER_HOUR;

        match particle.state {
            ParticleState::Cleared => {
                let cause = if particle.in_service {
                    DelayCause::CheckpointService
                } else {
                    DelayCause::CheckpointQueue
                };
                ctx.metrics.delay.add(cause, hours);
                return Ok(());
            }
            ParticleState::Road => {}
            ParticleState::Lot | ParticleState::Park | ParticleState::Departing => return Ok(()),
        }

        let (cell, class, mass, stall_reason, stall_s) = (
            particle.cell(),
            particle.class,
            particle.mass,
            particle.stall,
            particle.stall_s,
        );
        let routing = ctx.routing;
        let grid = ctx.grid;
        let label = field_label(class, ctx.checkpoint_open);
        let field = routing.field(label);

        let Some(mut next) = field.next_hop(cell) else {
            Self::at_field_end(ctx, id, cell, class, mass, label, hours)?;
            return Ok(());
        };

        let mut retreating = false;
        let entering_lot = entered_lot(grid, class, cell, next);
        if let Some(lot) = entering_lot {
            if ctx.lots.is_blocking(lot) {
                let backtrack =
                    stall_reason == Some(StallReason::LotFull) && stall_s >= self.params.backtrack_after_s;
                match self.reroute_around_lot(ctx, field, class, cell, next, backtrack) {
                    Some(alt) => {
                        retreating = field.potential(alt) > field.potential(cell);
                        next = alt;
                    }
                    None => {
                        stall(ctx, id, StallReason::LotFull, hours);
                        return Ok(());
                    }
                }
            }
        } else if self.is_capped(ctx, next) {
            match self.reroute_downhill(ctx, field, class, cell, next) {
                Some(alt) => next = alt,
                None => {
                    stall(ctx, id, StallReason::RoadCapacity, hours);
                    return Ok(());
                }
            }
        }

        let Some(dir) = grid.direction_between(cell, next) else {
            stall(ctx, id, StallReason::NoRoute, hours);
            return Ok(());
        };

        if grid.friction(cell) >= self.params.intersection_friction
            && congestion::is_red(
                self.params.seed,
                cell.get(),
                ctx.time_s,
                self.params.cycle_s,
                self.params.red_s,
            )
        {
            stall(ctx, id, StallReason::Intersection, hours);
            return Ok(());
        }

        // Held, parked and queued units do not occupy road space.
        let downstream = if grid.region(next) == Region::Road {
            ctx.arena.cell_mass(next)
        } else {
            0.0
        };
        let rho = congestion::effective_density(
            downstream,
            self.params.road_cap_mass,
            grid.friction(next),
            self.oncoming(next, dir),
        );
        let scale = congestion::response(rho, self.params.critical_density);
        let jitter = congestion::jitter(
            self.params.seed,
            id.into_inner(),
            ctx.substep,
            self.params.jitter_amplitude,
        );
        let displacement = self.params.speed_mps * scale * jitter * dt_s / self.params.cell_size_m;
        if displacement > self.params.cfl + CFL_EPSILON {
            return Err(InvariantViolation::Cfl {
                tick: ctx.tick,
                particle: id,
                cell,
                displacement,
                bound: self.params.cfl,
            });
        }

        let Some(particle) = ctx.arena.get(id) else {
            return Ok(());
        };
        // Moves are axis-aligned; the lateral coordinate carries through
        // turns, so the whole jump is the displacement the CFL check saw.
        let (ux, uy) = dir.unit();
        let (x, y) = (
            ux.mul_add(displacement, particle.x),
            uy.mul_add(displacement, particle.y),
        );

        let crossing = match grid.index_at(x, y) {
            Some(c) if c == cell => Crossing::Stay,
            Some(c) if c == next => Self::cross(ctx, id, class, cell, next, mass, label)?,
            _ => Crossing::Refused(StallReason::NoRoute),
        };

        if let Crossing::Refused(reason) = crossing {
            stall(ctx, id, reason, hours);
            return Ok(());
        }

        ctx.metrics
            .delay
            .add(DelayCause::Congestion, hours * (1.0 - scale));
        let now = ctx.time_s + dt_s;
        let (nx, ny) = grid.center(next);
        if let Some(p) = ctx.arena.get_mut(id) {
            // A retreat keeps its stall clock until it leaves the cell, so the
            // distance backed off does not depend on the sub-step length.
            if !(retreating && matches!(crossing, Crossing::Stay)) {
                p.stall = None;
                p.stall_s = 0.0;
            }
            match crossing {
                Crossing::Stay | Crossing::Entered => {
                    p.x = x;
                    p.y = y;
                }
                Crossing::Admitted(lot) => {
                    p.x = nx;
                    p.y = ny;
                    p.state = ParticleState::Lot;
                    p.lot = Some(lot);
                    p.dwell_start_s = Some(now);
                }
                Crossing::Arrived => {
                    p.x = nx;
                    p.y = ny;
                    p.state = ParticleState::Cleared;
                }
                Crossing::Refused(_) => {}
            }
        }
        match crossing {
            Crossing::Admitted(lot) => {
                ctx.dwell.push(DwellRecord {
                    lot,
                    particle: id,
                    arrival_s: now,
                });
                ctx.metrics.admissions += 1;
            }
            Crossing::Arrived => ctx.service.enqueue(id),
            Crossing::Stay | Crossing::Entered | Crossing::Refused(_) => {}
        }
        Ok(())
    }

    /// Handle the boundary crossing into `next`, relinking on success.
    #[allow(clippy::too_many_arguments)]
    fn cross(
        ctx: &mut DriftContext<'_>,
        id: ParticleId,
        class: CustomsClass,
        cell: CellIndex,
        next: CellIndex,
        mass: f64,
        label: FieldLabel,
    ) -> Result<Crossing, InvariantViolation> {
        let grid = ctx.grid;
        let routing = ctx.routing;
        if let Some(lot) = entered_lot(grid, class, cell, next) {
            if !ctx.lots.try_admit(lot, mass) {
                return Ok(Crossing::Refused(StallReason::LotFull));
            }
            ctx.arena.relink(id, next)?;
            return Ok(Crossing::Admitted(lot));
        }
        if class == CustomsClass::Cleared && grid.region(next) == Region::Sink {
            ctx.arena.relink(id, next)?;
            return Ok(Crossing::Arrived);
        }
        if !routing.field(label).is_reachable(next) {
            return Ok(Crossing::Refused(StallReason::NoRoute));
        }
        ctx.arena.relink(id, next)?;
        Ok(Crossing::Entered)
    }

    /// No next hop: the particle sits on a destination or is cut off. A
    /// restricted particle cut off from every lot waits for storage, and its
    /// time counts as lot wait.
    #[allow(clippy::too_many_arguments)]
    fn at_field_end(
        ctx: &mut DriftContext<'_>,
        id: ParticleId,
        cell: CellIndex,
        class: CustomsClass,
        mass: f64,
        label: FieldLabel,
        hours: f64,
    ) -> Result<(), InvariantViolation> {
        let grid = ctx.grid;
        let routing = ctx.routing;
        let field = routing.field(label);
        match (class, grid.region(cell)) {
            (CustomsClass::Restricted, Region::Lot) => {
                let Some(lot) = grid.lot(cell) else {
                    stall(ctx, id, StallReason::NoRoute, hours);
                    return Ok(());
                };
                if !ctx.lots.try_admit(lot, mass) {
                    stall(ctx, id, StallReason::LotFull, hours);
                    return Ok(());
                }
                let now = ctx.time_s;
                if let Some(p) = ctx.arena.get_mut(id) {
                    p.state = ParticleState::Lot;
                    p.lot = Some(lot);
                    p.dwell_start_s = Some(now);
                    p.stall = None;
                    p.stall_s = 0.0;
                }
                ctx.dwell.push(DwellRecord {
                    lot,
                    particle: id,
                    arrival_s: now,
                });
                ctx.metrics.admissions += 1;
            }
            (CustomsClass::Cleared, Region::Sink) => {
                if let Some(p) = ctx.arena.get_mut(id) {
                    p.state = ParticleState::Cleared;
                    p.stall = None;
                    p.stall_s = 0.0;
                }
                ctx.service.enqueue(id);
            }
            (CustomsClass::Cleared, _)
                if label == FieldLabel::CheckpointClosed && field.is_destination(cell) =>
            {
                stall(ctx, id, StallReason::CheckpointClosed, hours);
            }
            (CustomsClass::Restricted, _) if !field.is_reachable(cell) => {
                stall(ctx, id, StallReason::NoAdmittingLot, hours);
            }
            _ => stall(ctx, id, StallReason::NoRoute, hours),
        }
        Ok(())
    }

    fn is_capped(&self, ctx: &DriftContext<'_>, cell: CellIndex) -> bool {
        ctx.grid.region(cell) == Region::Road
            && ctx.arena.cell_mass(cell) >= self.params.road_cap_mass
    }

    /// Whether a particle of `class` in `cell` may step into `n` right now.
    fn can_enter(
        &self,
        ctx: &DriftContext<'_>,
        field: &FieldResult,
        class: CustomsClass,
        cell: CellIndex,
        n: CellIndex,
    ) -> bool {
        if !ctx.grid.is_passable(n, self.params.conductance_threshold) || !field.is_reachable(n) {
            return false;
        }
        if ctx.grid.region(n) == Region::Lot && ctx.grid.lot(n) != ctx.grid.lot(cell) {
            return match (class, ctx.grid.lot(n)) {
                (CustomsClass::Restricted, Some(lot)) => !ctx.lots.is_blocking(lot),
                _ => false,
            };
        }
        !self.is_capped(ctx, n)
    }

    /// Lowest-potential admissible neighbor, first in direction order on ties.
    fn best_neighbor(
        &self,
        ctx: &DriftContext<'_>,
        field: &FieldResult,
        class: CustomsClass,
        cell: CellIndex,
        exclude: CellIndex,
        accept: impl Fn(f64) -> bool,
    ) -> Option<CellIndex> {
        let mut best: Option<(CellIndex, f64)> = None;
        for (_, n) in ctx.grid.neighbors(cell) {
            if n == exclude || !self.can_enter(ctx, field, class, cell, n) {
                continue;
            }
            let p = field.potential(n);
            if !accept(p) {
                continue;
            }
            if best.is_none_or(|(_, bp)| p < bp) {
                best = Some((n, p));
            }
        }
        best.map(|(n, _)| n)
    }

    /// Alternative to a blocked lot entry: any admissible neighbor no higher
    /// than here, or, once the stall has lasted long enough, the lowest
    /// uphill one.
    fn reroute_around_lot(
        &self,
        ctx: &DriftContext<'_>,
        field: &FieldResult,
        class: CustomsClass,
        cell: CellIndex,
        blocked: CellIndex,
        backtrack: bool,
    ) -> Option<CellIndex> {
        let here = field.potential(cell);
        self.best_neighbor(ctx, field, class, cell, blocked, |p| p <= here)
            .or_else(|| {
                backtrack
                    .then(|| self.best_neighbor(ctx, field, class, cell, blocked, f64::is_finite))
                    .flatten()
            })
    }

    /// Alternative to a capped road cell: a strictly downhill neighbor.
    fn reroute_downhill(
        &self,
        ctx: &DriftContext<'_>,
        field: &FieldResult,
        class: CustomsClass,
        cell: CellIndex,
        blocked: CellIndex,
    ) -> Option<CellIndex> {
        let here = field.potential(cell);
        self.best_neighbor(ctx, field, class, cell, blocked, |p| p < here)
    }
}

/// Hold a particle in place for this sub-step and charge the delay.
fn stall(ctx: &mut DriftContext<'_>, id: ParticleId, reason: StallReason, hours: f64) {
    if let Some(p) = ctx.arena.get_mut(id) {
        p.stall = Some(reason);
        if reason == StallReason::LotFull && !p.ever_lot_full {
            p.ever_lot_full = true;
            ctx.metrics.lot_full_stalled += 1;
        }
    }
    ctx.metrics.delay.add(reason.delay_cause(), hours);
}

/// The lot a restricted particle would enter by stepping from `cell` into
/// `next`, if `next` belongs to a different lot.
fn entered_lot(grid: &Grid, class: CustomsClass, cell: CellIndex, next: CellIndex) -> Option<LotId> {
    if class != CustomsClass::Restricted || grid.region(next) != Region::Lot {
        return None;
    }
    let lot = grid.lot(next)?;
    (grid.lot(cell) != Some(lot)).then_some(lot)
}
