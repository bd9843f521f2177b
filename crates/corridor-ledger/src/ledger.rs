//! The mass ledger: an append-only record of mass entering and leaving the
//! simulation.
//!
//! Injection and checkpoint exit are the only two flows. Conversions, lot
//! admissions and park releases move mass around inside the system and are
//! not recorded here.

use std::collections::BTreeMap;

use corridor_types::ParticleId;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::LedgerError;
use crate::conservation::{self, ConservationResult};

/// Direction of a mass flow across the system boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MassFlow {
    /// Mass entered at a source.
    Injection,
    /// Mass left through the checkpoint.
    Exit,
}

/// One ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassEntry {
    /// Tick in which the flow happened.
    pub tick: u64,
    /// Which way the mass moved.
    pub flow: MassFlow,
    /// The particle carrying the mass.
    pub particle: ParticleId,
    /// Mass moved.
    pub mass: f64,
}

/// The central mass ledger.
///
/// Keeps the full entry log, the running totals, and the set of particles
/// currently live, so an exit can be matched against its injection.
#[derive(Debug, Default)]
pub struct MassLedger {
    /// All entries, in insertion order.
    entries: Vec<MassEntry>,
    /// Live particles and the mass each carries.
    live: BTreeMap<ParticleId, f64>,
    /// Cumulative injected mass.
    injected: f64,
    /// Cumulative exited mass.
    exited: f64,
}

impl MassLedger {
    /// Create an empty ledger.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            live: BTreeMap::new(),
            injected: 0.0,
            exited: 0.0,
        }
    }

    /// Number of entries.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that `particle` entered the system carrying `mass`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidMass`] for non-positive or non-finite
    /// mass and [`LedgerError::DuplicateInjection`] if the particle is
    /// already live.
    pub fn record_injection(
        &mut self,
        tick: u64,
        particle: ParticleId,
        mass: f64,
    ) -> Result<(), LedgerError> {
        if !mass.is_finite() || mass <= 0.0 {
            return Err(LedgerError::InvalidMass { mass });
        }
        if self.live.contains_key(&particle) {
            return Err(LedgerError::DuplicateInjection { particle });
        }
        self.live.insert(particle, mass);
        self.injected += mass;
        self.entries.push(MassEntry {
            tick,
            flow: MassFlow::Injection,
            particle,
            mass,
        });
        trace!(tick, %particle, mass, "Mass injected");
        Ok(())
    }

    /// Record that `particle` left through the checkpoint. Returns the mass
    /// it carried.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownParticle`] if the particle is not live.
    pub fn record_exit(&mut self, tick: u64, particle: ParticleId) -> Result<f64, LedgerError> {
        let mass = self
            .live
            .remove(&particle)
            .ok_or(LedgerError::UnknownParticle { particle })?;
        self.exited += mass;
        self.entries.push(MassEntry {
            tick,
            flow: MassFlow::Exit,
            particle,
            mass,
        });
        trace!(tick, %particle, mass, "Mass exited");
        Ok(mass)
    }

    /// Cumulative injected mass.
    pub const fn injected(&self) -> f64 {
        self.injected
    }

    /// Cumulative exited mass.
    pub const fn exited(&self) -> f64 {
        self.exited
    }

    /// Mass the ledger expects to still be in the system.
    pub fn outstanding(&self) -> f64 {
        self.injected - self.exited
    }

    /// Number of particles the ledger considers live.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether `particle` is live.
    pub fn is_live(&self, particle: ParticleId) -> bool {
        self.live.contains_key(&particle)
    }

    /// Entries recorded during `tick`.
    pub fn entries_for_tick(&self, tick: u64) -> Vec<&MassEntry> {
        self.entries.iter().filter(|e| e.tick == tick).collect()
    }

    /// All entries in insertion order.
    pub fn all_entries(&self) -> &[MassEntry] {
        &self.entries
    }

    /// Net mass flow during `tick`: injections minus exits.
    pub fn net_flow_for_tick(&self, tick: u64) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.tick == tick)
            .map(|e| match e.flow {
                MassFlow::Injection => e.mass,
                MassFlow::Exit => -e.mass,
            })
            .sum()
    }

    /// Check the conservation law against the mass actually on the grid,
    /// using the default tolerance.
    pub fn verify_conservation(&self, tick: u64, active_mass: f64) -> ConservationResult {
        conservation::verify_conservation(
            tick,
            self.injected,
            self.exited,
            active_mass,
            conservation::DEFAULT_TOLERANCE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_and_exit_update_totals() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 1.0).is_ok());
        assert!(ledger.record_injection(1, ParticleId(1), 2.0).is_ok());
        let exited = ledger.record_exit(3, ParticleId(1));
        assert!(matches!(exited, Ok(m) if (m - 2.0).abs() < f64::EPSILON));

        assert!((ledger.injected() - 3.0).abs() < f64::EPSILON);
        assert!((ledger.exited() - 2.0).abs() < f64::EPSILON);
        assert!((ledger.outstanding() - 1.0).abs() < f64::EPSILON);
        assert_eq!(ledger.live_count(), 1);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn exit_of_unknown_particle_is_rejected() {
        let mut ledger = MassLedger::new();
        assert!(matches!(
            ledger.record_exit(1, ParticleId(5)),
            Err(LedgerError::UnknownParticle { .. })
        ));
    }

    #[test]
    fn double_exit_is_rejected() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 1.0).is_ok());
        assert!(ledger.record_exit(2, ParticleId(0)).is_ok());
        assert!(ledger.record_exit(2, ParticleId(0)).is_err());
    }

    #[test]
    fn duplicate_injection_is_rejected() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 1.0).is_ok());
        assert!(matches!(
            ledger.record_injection(1, ParticleId(0), 1.0),
            Err(LedgerError::DuplicateInjection { .. })
        ));
    }

    #[test]
    fn non_positive_mass_is_rejected() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 0.0).is_err());
        assert!(ledger.record_injection(1, ParticleId(1), f64::NAN).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn net_flow_is_per_tick() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 1.0).is_ok());
        assert!(ledger.record_injection(2, ParticleId(1), 1.0).is_ok());
        assert!(ledger.record_exit(2, ParticleId(0)).is_ok());
        assert!((ledger.net_flow_for_tick(1) - 1.0).abs() < f64::EPSILON);
        assert!(ledger.net_flow_for_tick(2).abs() < f64::EPSILON);
        assert_eq!(ledger.entries_for_tick(2).len(), 2);
    }

    #[test]
    fn conservation_detects_missing_mass() {
        let mut ledger = MassLedger::new();
        assert!(ledger.record_injection(1, ParticleId(0), 1.0).is_ok());
        assert_eq!(
            ledger.verify_conservation(1, 1.0),
            ConservationResult::Balanced
        );
        assert!(matches!(
            ledger.verify_conservation(1, 0.0),
            ConservationResult::Anomaly(_)
        ));
    }
}
