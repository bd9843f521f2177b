//! Storage lots and the admission state machine.
//!
//! Each lot cycles `Admitting -> Draining -> Cooldown -> Admitting`:
//!
//! - **Admitting** accepts mass while its fill ratio is below the admission
//!   cutoff and the unit fits under capacity.
//! - **Draining** starts once the fill ratio reaches the cutoff. It only
//!   releases mass.
//! - **Cooldown** starts when a draining lot empties and lasts a fixed
//!   duration. The lot stays closed even though it is empty.
//!
//! Transitions are evaluated once per tick by [`LotRegistry::update`]. The
//! registry never moves particles; it only answers the drift engine's
//! capacity questions and reports transitions so the router can be rebuilt.

use corridor_types::{AdmissionState, CellIndex, LotId, LotSnapshot};
use tracing::info;

/// Slack for comparing accumulated mass against capacity.
const MASS_EPSILON: f64 = 1e-9;

/// A storage lot.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    /// Index in the registry.
    pub id: LotId,
    /// Human-readable name.
    pub name: String,
    /// Cells making up the lot.
    pub cells: Vec<CellIndex>,
    /// Capacity in mass.
    pub capacity: f64,
    /// Mass currently held.
    occupied: f64,
    /// Admission state.
    state: AdmissionState,
    /// When an active cooldown ends.
    cooldown_until: Option<f64>,
}

impl Lot {
    /// Create an empty, admitting lot.
    pub const fn new(id: LotId, name: String, cells: Vec<CellIndex>, capacity: f64) -> Self {
        Self {
            id,
            name,
            cells,
            capacity,
            occupied: 0.0,
            state: AdmissionState::Admitting,
            cooldown_until: None,
        }
    }

    /// Mass currently held.
    pub const fn occupied(&self) -> f64 {
        self.occupied
    }

    /// Admission state.
    pub const fn state(&self) -> AdmissionState {
        self.state
    }

    /// When the current cooldown ends, if cooling down.
    pub const fn cooldown_until(&self) -> Option<f64> {
        self.cooldown_until
    }

    /// Occupied over capacity.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity > 0.0 {
            self.occupied / self.capacity
        } else {
            1.0
        }
    }
}

/// One admission state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The lot that changed.
    pub lot: LotId,
    /// Previous state.
    pub from: AdmissionState,
    /// New state.
    pub to: AdmissionState,
}

/// Result of one admission update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionUpdate {
    /// Transitions applied this tick.
    pub transitions: Vec<Transition>,
    /// Whether the number of admitting lots changed.
    pub admitting_count_changed: bool,
}

impl AdmissionUpdate {
    /// Whether the router should be rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        !self.transitions.is_empty() || self.admitting_count_changed
    }
}

/// All lots of a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct LotRegistry {
    lots: Vec<Lot>,
    admission_cutoff: f64,
    cooldown_s: f64,
}

impl LotRegistry {
    /// Create a registry.
    pub const fn new(lots: Vec<Lot>, admission_cutoff: f64, cooldown_s: f64) -> Self {
        Self {
            lots,
            admission_cutoff,
            cooldown_s,
        }
    }

    /// Number of lots.
    pub fn len(&self) -> usize {
        self.lots.len()
    }

    /// Whether there are no lots.
    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    /// Look up a lot.
    pub fn get(&self, id: LotId) -> Option<&Lot> {
        self.lots.get(id.get())
    }

    /// All lots in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter()
    }

    /// Whether `lot` refuses new mass right now: not admitting, or at or
    /// above the admission cutoff. Unknown lots refuse.
    pub fn is_blocking(&self, lot: LotId) -> bool {
        self.get(lot).is_none_or(|l| {
            l.state != AdmissionState::Admitting
                || l.fill_ratio() >= self.admission_cutoff - MASS_EPSILON
        })
    }

    /// Admit `mass` into `lot` if it is admitting, below the cutoff, and the
    /// mass fits under capacity.
    pub fn try_admit(&mut self, lot: LotId, mass: f64) -> bool {
        if self.is_blocking(lot) {
            return false;
        }
        let Some(l) = self.lots.get_mut(lot.get()) else {
            return false;
        };
        if l.occupied + mass > l.capacity + MASS_EPSILON {
            return false;
        }
        l.occupied += mass;
        true
    }

    /// Remove `mass` from `lot` (conversion or departure).
    pub fn release(&mut self, lot: LotId, mass: f64) {
        if let Some(l) = self.lots.get_mut(lot.get()) {
            l.occupied = (l.occupied - mass).max(0.0);
            if l.occupied < MASS_EPSILON {
                l.occupied = 0.0;
            }
        }
    }

    /// Number of lots currently admitting.
    pub fn admitting_count(&self) -> usize {
        self.lots
            .iter()
            .filter(|l| l.state == AdmissionState::Admitting)
            .count()
    }

    /// Evaluate every lot's transition at simulated time `now_s`.
    pub fn update(&mut self, now_s: f64) -> AdmissionUpdate {
        let before = self.admitting_count();
        let cutoff = self.admission_cutoff;
        let cooldown = self.cooldown_s;
        let mut transitions = Vec::new();

        for lot in &mut self.lots {
            let from = lot.state;
            match lot.state {
                AdmissionState::Admitting => {
                    if lot.fill_ratio() >= cutoff - MASS_EPSILON {
                        lot.state = AdmissionState::Draining;
                    }
                }
                AdmissionState::Draining => {
                    if lot.occupied <= MASS_EPSILON {
                        lot.state = AdmissionState::Cooldown;
                        lot.cooldown_until = Some(now_s + cooldown);
                    }
                }
                AdmissionState::Cooldown => {
                    if lot.cooldown_until.is_none_or(|deadline| now_s >= deadline) {
                        lot.state = AdmissionState::Admitting;
                        lot.cooldown_until = None;
                    }
                }
            }
            if lot.state != from {
                info!(
                    lot = %lot.id,
                    name = %lot.name,
                    from = ?from,
                    to = ?lot.state,
                    occupied = lot.occupied,
                    now_s,
                    "Lot admission transition"
                );
                transitions.push(Transition {
                    lot: lot.id,
                    from,
                    to: lot.state,
                });
            }
        }

        AdmissionUpdate {
            transitions,
            admitting_count_changed: self.admitting_count() != before,
        }
    }

    /// Per-lot utilization (occupied over capacity, clamped to `[0, 1]`).
    pub fn utilization(&self) -> Vec<f64> {
        self.lots
            .iter()
            .map(|l| l.fill_ratio().clamp(0.0, 1.0))
            .collect()
    }

    /// Per-lot admitting flag.
    pub fn admitting(&self) -> Vec<bool> {
        self.lots
            .iter()
            .map(|l| l.state == AdmissionState::Admitting)
            .collect()
    }

    /// Metrics view of every lot.
    pub fn snapshots(&self) -> Vec<LotSnapshot> {
        self.lots
            .iter()
            .map(|l| LotSnapshot {
                id: l.id,
                name: l.name.clone(),
                fill_ratio: l.fill_ratio(),
                occupied_mass: l.occupied,
                state: l.state,
            })
            .collect()
    }
}
