//! Particle arena.
//!
//! Particles live in a flat slot vector with a free list, so a particle's
//! slot is stable for its whole life. Each cell keeps an intrusive
//! doubly-linked list threaded through the particles' `prev`/`next` slot
//! links, plus a mass accumulator. Moving a particle between cells relinks
//! it and moves its mass in one call, so membership and cell mass never
//! disagree.
//!
//! Iteration order is slot order. Slots are reused lowest-first, which keeps
//! the order a pure function of the run's history.

use std::collections::{BTreeSet, HashMap};

use corridor_types::{
    CellIndex, CustomsClass, LotId, ParticleId, ParticleState, ParticleView, StallReason,
};

/// One truck-unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Unique id, never reused within a run.
    pub id: ParticleId,
    /// Continuous x position in cell units.
    pub x: f64,
    /// Continuous y position in cell units.
    pub y: f64,
    /// Owning cell. Only the arena changes it.
    cell: CellIndex,
    /// Carried mass.
    pub mass: f64,
    /// Customs class.
    pub class: CustomsClass,
    /// Lifecycle state.
    pub state: ParticleState,
    /// Seconds since injection.
    pub age_s: f64,
    /// Current stall reason.
    pub stall: Option<StallReason>,
    /// Seconds spent in the current stall.
    pub stall_s: f64,
    /// Whether this particle has ever been blocked by a full lot.
    pub ever_lot_full: bool,
    /// Owning lot while held.
    pub lot: Option<LotId>,
    /// When the current hold started.
    pub dwell_start_s: Option<f64>,
    /// Whether the particle occupies a checkpoint lane.
    pub in_service: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Particle {
    /// Owning cell.
    pub const fn cell(&self) -> CellIndex {
        self.cell
    }

    /// Rendering view.
    pub const fn view(&self) -> ParticleView {
        ParticleView {
            id: self.id,
            x: self.x,
            y: self.y,
            cell: self.cell,
            class: self.class,
            state: self.state,
            stall: self.stall,
        }
    }
}

/// Arguments for [`ParticleArena::spawn`].
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams {
    /// Cell to place the particle in; it starts at the cell center.
    pub cell: CellIndex,
    /// Cell center, from the grid.
    pub position: (f64, f64),
    /// Carried mass.
    pub mass: f64,
    /// Customs class.
    pub class: CustomsClass,
    /// Initial lifecycle state.
    pub state: ParticleState,
}

/// Errors from arena bookkeeping. These always indicate a modeling bug.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// The particle is not live.
    #[error("particle {0} is not live")]
    UnknownParticle(ParticleId),

    /// A cell index is outside the arena's grid.
    #[error("cell {cell} is outside a grid of {len} cells")]
    CellOutOfBounds {
        /// Offending cell.
        cell: CellIndex,
        /// Number of cells.
        len: usize,
    },
}

/// Flat particle pool with per-cell index-linked occupant lists.
#[derive(Debug, Clone, Default)]
pub struct ParticleArena {
    slots: Vec<Option<Particle>>,
    free: BTreeSet<usize>,
    by_id: HashMap<ParticleId, usize>,
    heads: Vec<Option<usize>>,
    cell_mass: Vec<f64>,
    cell_count: Vec<usize>,
    next_id: u64,
}

impl ParticleArena {
    /// Create an empty arena for a grid of `cells` cells.
    pub fn new(cells: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            by_id: HashMap::new(),
            heads: vec![None; cells],
            cell_mass: vec![0.0; cells],
            cell_count: vec![0; cells],
            next_id: 0,
        }
    }

    /// Live particle count.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no particle is live.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of cells tracked.
    pub fn cell_len(&self) -> usize {
        self.heads.len()
    }

    fn check_cell(&self, cell: CellIndex) -> Result<(), ArenaError> {
        if cell.get() < self.heads.len() {
            Ok(())
        } else {
            Err(ArenaError::CellOutOfBounds {
                cell,
                len: self.heads.len(),
            })
        }
    }

    /// Create a particle and link it into its cell.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::CellOutOfBounds`] for a cell outside the grid.
    pub fn spawn(&mut self, params: SpawnParams) -> Result<ParticleId, ArenaError> {
        self.check_cell(params.cell)?;
        let id = ParticleId(self.next_id);
        self.next_id += 1;
        let particle = Particle {
            id,
            x: params.position.0,
            y: params.position.1,
            cell: params.cell,
            mass: params.mass,
            class: params.class,
            state: params.state,
            age_s: 0.0,
            stall: None,
            stall_s: 0.0,
            ever_lot_full: false,
            lot: None,
            dwell_start_s: None,
            in_service: false,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop_first() {
            Some(slot) => {
                if let Some(entry) = self.slots.get_mut(slot) {
                    *entry = Some(particle);
                }
                slot
            }
            None => {
                self.slots.push(Some(particle));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, slot);
        self.link(slot, params.cell);
        Ok(id)
    }

    /// Look up a live particle.
    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        let slot = *self.by_id.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Look up a live particle mutably. The owning cell cannot be changed
    /// through this reference; use [`relink`](Self::relink).
    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        let slot = *self.by_id.get(&id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: ParticleId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Move a particle into `to`, carrying its mass.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError`] if the particle is not live or `to` is outside
    /// the grid.
    pub fn relink(&mut self, id: ParticleId, to: CellIndex) -> Result<(), ArenaError> {
        self.check_cell(to)?;
        let slot = *self.by_id.get(&id).ok_or(ArenaError::UnknownParticle(id))?;
        self.unlink(slot);
        self.link(slot, to);
        Ok(())
    }

    /// Unlink and drop a particle, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::UnknownParticle`] if the particle is not live.
    pub fn remove(&mut self, id: ParticleId) -> Result<Particle, ArenaError> {
        let slot = self.by_id.remove(&id).ok_or(ArenaError::UnknownParticle(id))?;
        self.unlink(slot);
        let particle = self
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(ArenaError::UnknownParticle(id))?;
        self.free.insert(slot);
        Ok(particle)
    }

    /// Ids of all live particles in slot order.
    pub fn ids(&self) -> Vec<ParticleId> {
        self.slots.iter().flatten().map(|p| p.id).collect()
    }

    /// All live particles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.slots.iter().flatten()
    }

    /// Ids of the particles in `cell`, most recently linked first.
    pub fn occupants(&self, cell: CellIndex) -> Vec<ParticleId> {
        let mut out = Vec::new();
        let mut cursor = self.heads.get(cell.get()).copied().flatten();
        while let Some(slot) = cursor {
            let Some(Some(particle)) = self.slots.get(slot) else {
                break;
            };
            out.push(particle.id);
            cursor = particle.next;
        }
        out
    }

    /// Mass recorded in `cell`.
    pub fn cell_mass(&self, cell: CellIndex) -> f64 {
        self.cell_mass.get(cell.get()).copied().unwrap_or(0.0)
    }

    /// Number of particles recorded in `cell`.
    pub fn cell_count(&self, cell: CellIndex) -> usize {
        self.cell_count.get(cell.get()).copied().unwrap_or(0)
    }

    /// Total mass of live particles.
    pub fn total_mass(&self) -> f64 {
        self.iter().map(|p| p.mass).sum()
    }

    /// Rendering snapshot of every live particle.
    pub fn views(&self) -> Vec<ParticleView> {
        self.iter().map(Particle::view).collect()
    }

    fn link(&mut self, slot: usize, cell: CellIndex) {
        let old_head = self.heads.get(cell.get()).copied().flatten();
        let mut mass = 0.0;
        if let Some(Some(particle)) = self.slots.get_mut(slot) {
            particle.cell = cell;
            particle.prev = None;
            particle.next = old_head;
            mass = particle.mass;
        }
        if let Some(head) = old_head
            && let Some(Some(p)) = self.slots.get_mut(head)
        {
            p.prev = Some(slot);
        }
        if let Some(head) = self.heads.get_mut(cell.get()) {
            *head = Some(slot);
        }
        if let Some(m) = self.cell_mass.get_mut(cell.get()) {
            *m += mass;
        }
        if let Some(c) = self.cell_count.get_mut(cell.get()) {
            *c += 1;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Some(Some(particle)) = self.slots.get_mut(slot) else {
            return;
        };
        let (cell, prev, next, mass) = (particle.cell, particle.prev, particle.next, particle.mass);
        particle.prev = None;
        particle.next = None;

        match prev {
            Some(p) => {
                if let Some(Some(before)) = self.slots.get_mut(p) {
                    before.next = next;
                }
            }
            None => {
                if let Some(head) = self.heads.get_mut(cell.get()) {
                    *head = next;
                }
            }
        }
        if let Some(n) = next
            && let Some(Some(after)) = self.slots.get_mut(n)
        {
            after.prev = prev;
        }
        if let Some(m) = self.cell_mass.get_mut(cell.get()) {
            *m -= mass;
            // Snap float residue from long add/subtract chains.
            if self.cell_count.get(cell.get()).copied().unwrap_or(0) <= 1 {
                *m = 0.0;
            }
        }
        if let Some(c) = self.cell_count.get_mut(cell.get()) {
            *c = c.saturating_sub(1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spawn_at(arena: &mut ParticleArena, cell: usize) -> ParticleId {
        arena
            .spawn(SpawnParams {
                cell: CellIndex(cell),
                position: (0.5, 0.5),
                mass: 1.0,
                class: CustomsClass::Restricted,
                state: ParticleState::Road,
            })
            .unwrap()
    }

    #[test]
    fn spawn_links_and_counts_mass() {
        let mut arena = ParticleArena::new(4);
        let a = spawn_at(&mut arena, 1);
        let b = spawn_at(&mut arena, 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.occupants(CellIndex(1)), vec![b, a]);
        assert!((arena.cell_mass(CellIndex(1)) - 2.0).abs() < f64::EPSILON);
        assert_eq!(arena.get(a).map(Particle::cell), Some(CellIndex(1)));
    }

    #[test]
    fn relink_moves_membership_and_mass() {
        let mut arena = ParticleArena::new(4);
        let a = spawn_at(&mut arena, 0);
        let b = spawn_at(&mut arena, 0);
        let c = spawn_at(&mut arena, 0);
        arena.relink(b, CellIndex(3)).unwrap();

        assert_eq!(arena.occupants(CellIndex(0)), vec![c, a]);
        assert_eq!(arena.occupants(CellIndex(3)), vec![b]);
        assert!((arena.cell_mass(CellIndex(0)) - 2.0).abs() < f64::EPSILON);
        assert!((arena.cell_mass(CellIndex(3)) - 1.0).abs() < f64::EPSILON);
        assert_eq!(arena.get(b).map(Particle::cell), Some(CellIndex(3)));
    }

    #[test]
    fn remove_frees_slot_for_reuse_but_not_id() {
        let mut arena = ParticleArena::new(2);
        let a = spawn_at(&mut arena, 0);
        let b = spawn_at(&mut arena, 1);
        let removed = arena.remove(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(arena.occupants(CellIndex(0)).is_empty());
        assert!(arena.cell_mass(CellIndex(0)).abs() < f64::EPSILON);

        let c = spawn_at(&mut arena, 1);
        assert_ne!(c, a);
        // Slot 0 was reused, so c iterates before b.
        assert_eq!(arena.ids(), vec![c, b]);
    }

    #[test]
    fn removing_unknown_particle_errors() {
        let mut arena = ParticleArena::new(2);
        assert!(arena.remove(ParticleId(9)).is_err());
        assert!(arena.relink(ParticleId(9), CellIndex(0)).is_err());
    }

    #[test]
    fn spawn_outside_grid_errors() {
        let mut arena = ParticleArena::new(2);
        let result = arena.spawn(SpawnParams {
            cell: CellIndex(5),
            position: (0.0, 0.0),
            mass: 1.0,
            class: CustomsClass::Cleared,
            state: ParticleState::Road,
        });
        assert!(result.is_err());
        assert!(arena.is_empty());
    }

    #[test]
    fn unlink_middle_keeps_list_intact() {
        let mut arena = ParticleArena::new(1);
        let ids: Vec<ParticleId> = (0..5).map(|_| spawn_at(&mut arena, 0)).collect();
        arena.remove(ids[2]).unwrap();
        arena.remove(ids[4]).unwrap();
        assert_eq!(arena.occupants(CellIndex(0)), vec![ids[3], ids[1], ids[0]]);
        assert_eq!(arena.cell_count(CellIndex(0)), 3);
    }
}
