//! Strict-mode invariant checks.
//!
//! Run after every tick when `simulation.strict_invariants` is set. Any
//! violation aborts the run: these are modeling bugs, not recoverable
//! conditions.

use std::collections::BTreeMap;

use corridor_ledger::{ConservationResult, MassLedger, MassAnomaly};
use corridor_types::{CellIndex, LotId, ParticleId, ParticleState};

use crate::lots::LotRegistry;
use crate::particles::{ArenaError, ParticleArena};

/// Slack for comparing summed masses.
const MASS_TOLERANCE: f64 = 1e-6;

/// A broken simulation invariant.
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    /// A cell's recorded mass differs from the mass of its occupants.
    #[error("tick {tick}: cell {cell} records mass {recorded} but its occupants carry {expected}")]
    CellMass {
        /// Tick of the check.
        tick: u64,
        /// Offending cell.
        cell: CellIndex,
        /// Mass in the cell accumulator.
        recorded: f64,
        /// Sum over the occupant list.
        expected: f64,
    },

    /// A particle is missing from, or misfiled in, the occupant lists.
    #[error("tick {tick}: particle {particle} membership is inconsistent: {reason}")]
    Membership {
        /// Tick of the check.
        tick: u64,
        /// Offending particle.
        particle: ParticleId,
        /// What is wrong.
        reason: String,
    },

    /// A lot holds more than its capacity.
    #[error("tick {tick}: lot {lot} holds {occupied} over capacity {capacity}")]
    LotOverCapacity {
        /// Tick of the check.
        tick: u64,
        /// Offending lot.
        lot: LotId,
        /// Mass held.
        occupied: f64,
        /// Lot capacity.
        capacity: f64,
    },

    /// A lot's occupancy disagrees with the particles it holds.
    #[error("tick {tick}: lot {lot} records {recorded} but holds particles of mass {held}")]
    LotMass {
        /// Tick of the check.
        tick: u64,
        /// Offending lot.
        lot: LotId,
        /// Occupancy in the registry.
        recorded: f64,
        /// Sum of held particles' mass.
        held: f64,
    },

    /// A particle moved further than the stability bound allows.
    #[error(
        "tick {tick}: particle {particle} in cell {cell} moved {displacement} cells in one sub-step (bound {bound})"
    )]
    Cfl {
        /// Tick of the sub-step.
        tick: u64,
        /// Offending particle.
        particle: ParticleId,
        /// Cell it moved from.
        cell: CellIndex,
        /// Displacement in cells.
        displacement: f64,
        /// Configured bound.
        bound: f64,
    },

    /// Mass conservation failed.
    #[error("{anomaly}")]
    Conservation {
        /// Ledger report.
        anomaly: MassAnomaly,
    },

    /// Arena bookkeeping failed mid-tick.
    #[error("arena bookkeeping failed: {source}")]
    Bookkeeping {
        /// The arena error.
        #[from]
        source: ArenaError,
    },
}

/// Run every check. Returns the first violation found.
///
/// # Errors
///
/// Returns the first [`InvariantViolation`] found.
pub fn check_all(
    tick: u64,
    arena: &ParticleArena,
    lots: &LotRegistry,
    ledger: &MassLedger,
) -> Result<(), InvariantViolation> {
    check_cells(tick, arena)?;
    check_lots(tick, arena, lots)?;
    check_conservation(tick, arena, ledger)
}

/// Every live particle is filed exactly once, in its own cell, and every
/// cell's mass accumulator matches its occupants.
///
/// # Errors
///
/// Returns [`InvariantViolation::Membership`] or
/// [`InvariantViolation::CellMass`].
pub fn check_cells(tick: u64, arena: &ParticleArena) -> Result<(), InvariantViolation> {
    let mut filed = 0_usize;
    for index in 0..arena.cell_len() {
        let cell = CellIndex(index);
        let occupants = arena.occupants(cell);
        let mut expected = 0.0;
        for id in &occupants {
            let Some(particle) = arena.get(*id) else {
                return Err(InvariantViolation::Membership {
                    tick,
                    particle: *id,
                    reason: format!("listed in cell {cell} but not live"),
                });
            };
            if particle.cell() != cell {
                return Err(InvariantViolation::Membership {
                    tick,
                    particle: *id,
                    reason: format!("listed in cell {cell} but owned by cell {}", particle.cell()),
                });
            }
            expected += particle.mass;
        }
        filed += occupants.len();

        let recorded = arena.cell_mass(cell);
        if (recorded - expected).abs() > MASS_TOLERANCE {
            return Err(InvariantViolation::CellMass {
                tick,
                cell,
                recorded,
                expected,
            });
        }
    }

    if filed != arena.len() {
        let unfiled = arena
            .iter()
            .find(|p| !arena.occupants(p.cell()).contains(&p.id))
            .map_or(ParticleId(u64::MAX), |p| p.id);
        return Err(InvariantViolation::Membership {
            tick,
            particle: unfiled,
            reason: format!("{filed} particles filed but {} live", arena.len()),
        });
    }
    Ok(())
}

/// Lots stay within capacity and their occupancy equals held mass.
///
/// # Errors
///
/// Returns [`InvariantViolation::LotOverCapacity`] or
/// [`InvariantViolation::LotMass`].
pub fn check_lots(
    tick: u64,
    arena: &ParticleArena,
    lots: &LotRegistry,
) -> Result<(), InvariantViolation> {
    let mut held: BTreeMap<LotId, f64> = BTreeMap::new();
    for particle in arena.iter() {
        if particle.state == ParticleState::Lot
            && let Some(lot) = particle.lot
        {
            *held.entry(lot).or_insert(0.0) += particle.mass;
        }
    }

    for lot in lots.iter() {
        if lot.occupied() > lot.capacity + MASS_TOLERANCE {
            return Err(InvariantViolation::LotOverCapacity {
                tick,
                lot: lot.id,
                occupied: lot.occupied(),
                capacity: lot.capacity,
            });
        }
        let held_mass = held.get(&lot.id).copied().unwrap_or(0.0);
        if (held_mass - lot.occupied()).abs() > MASS_TOLERANCE {
            return Err(InvariantViolation::LotMass {
                tick,
                lot: lot.id,
                recorded: lot.occupied(),
                held: held_mass,
            });
        }
    }
    Ok(())
}

/// Injected minus exited equals live mass.
///
/// # Errors
///
/// Returns [`InvariantViolation::Conservation`].
pub fn check_conservation(
    tick: u64,
    arena: &ParticleArena,
    ledger: &MassLedger,
) -> Result<(), InvariantViolation> {
    match ledger.verify_conservation(tick, arena.total_mass()) {
        ConservationResult::Balanced => Ok(()),
        ConservationResult::Anomaly(anomaly) => Err(InvariantViolation::Conservation { anomaly }),
    }
}
