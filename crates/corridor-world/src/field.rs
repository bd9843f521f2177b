//! Potential field router.
//!
//! Computes a scalar potential (cost-to-sink) for every cell with a
//! multi-source Dijkstra relaxation, then derives a next-hop table that
//! points each reachable cell at the neighbor its potential was relaxed
//! through: lowest neighbor potential plus the cost of entering it.
//! Particles route greedily by following the table.
//!
//! # Field labels
//!
//! Three fields coexist and are computed independently:
//!
//! - [`FieldLabel::Lots`] is seeded from the cells of admitting lots. Edges
//!   entering a lot cell pay `1 + alpha * utilization^beta`, so a nearly
//!   full lot repels traffic before it closes. The checkpoint is
//!   impassable.
//! - [`FieldLabel::Checkpoint`] is seeded from the checkpoint cells. Road
//!   cells may not acquire potential by relaxing through a lot, and may not
//!   pick a lot neighbor as next hop. Lot interiors still receive potential
//!   from their road entries, so parked trucks can find their way out.
//! - [`FieldLabel::CheckpointClosed`] applies the same exit rules but is
//!   seeded from the passable neighbors of the checkpoint, which itself is
//!   impassable. Cleared trucks queue up at the approach while the
//!   checkpoint is not servicing.
//!
//! An empty seed set is not an error: every cell is unreachable and
//! `reachable_count` is zero.

use corridor_types::{CellIndex, FieldLabel, LotId, Region};
use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::grid::Grid;
use crate::heap::MinHeap;

/// Potential of cells no sink can reach.
pub const UNREACHABLE: f64 = f64::MAX;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Tunable router constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouterParams {
    /// Potential assigned to every seed before bias.
    pub seed_cost: f64,
    /// Seed bias per unit of lot utilization (lots field only).
    pub bias_weight: f64,
    /// Scale of the lot-capacity penalty.
    pub alpha: f64,
    /// Exponent of the lot-capacity penalty.
    pub beta: f64,
    /// Cells with both conductance components below this are impassable.
    pub conductance_threshold: f64,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            seed_cost: 0.01,
            bias_weight: 0.0,
            alpha: 8.0,
            beta: 4.0,
            conductance_threshold: 0.01,
        }
    }
}

impl RouterParams {
    /// Reject parameters that would break Dijkstra's non-negative cost
    /// assumption.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidParams`] describing the first problem.
    pub fn validate(&self) -> Result<(), WorldError> {
        let checks = [
            ("seed_cost", self.seed_cost),
            ("bias_weight", self.bias_weight),
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("conductance_threshold", self.conductance_threshold),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(WorldError::InvalidParams {
                    reason: format!("{name} must be finite and non-negative, got {value}"),
                });
            }
        }
        if self.conductance_threshold <= 0.0 {
            return Err(WorldError::InvalidParams {
                reason: "conductance_threshold must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Everything the router needs besides the grid itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRequest {
    /// Which field to compute.
    pub label: FieldLabel,
    /// Candidate seed cells. Filtered by passability and lot admission.
    pub sinks: Vec<CellIndex>,
    /// Per-lot occupied mass over capacity, indexed by [`LotId`].
    pub lot_utilization: Vec<f64>,
    /// Per-lot flag: currently admitting. Non-admitting lots are not seeded.
    pub lot_admitting: Vec<bool>,
    /// Router constants.
    pub params: RouterParams,
}

impl FieldRequest {
    /// The seed cells [`FieldLabel`] conventionally uses on `grid`: admitting
    /// lot cells, checkpoint cells, or the checkpoint approach.
    pub fn default_sinks(grid: &Grid, label: FieldLabel) -> Vec<CellIndex> {
        match label {
            FieldLabel::Lots => grid.cells_with_region(Region::Lot),
            FieldLabel::Checkpoint => grid.cells_with_region(Region::Sink),
            FieldLabel::CheckpointClosed => {
                let mut approach: Vec<CellIndex> = grid
                    .cells_with_region(Region::Sink)
                    .into_iter()
                    .flat_map(|sink| grid.neighbors(sink).map(|(_, n)| n).collect::<Vec<_>>())
                    .filter(|&n| grid.region(n) != Region::Sink)
                    .collect();
                approach.sort_unstable();
                approach.dedup();
                approach
            }
        }
    }

    fn utilization(&self, lot: LotId) -> f64 {
        self.lot_utilization
            .get(lot.get())
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }

    fn admitting(&self, lot: LotId) -> bool {
        self.lot_admitting.get(lot.get()).copied().unwrap_or(false)
    }
}

/// A computed potential field and its next-hop table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    /// Which field this is.
    pub label: FieldLabel,
    /// Potential per cell; [`UNREACHABLE`] where no seed reaches.
    pub potential: Vec<f64>,
    /// Next hop per cell; `None` for seeds and unreachable cells.
    pub next_hop: Vec<Option<CellIndex>>,
    /// Number of cells with finite potential.
    pub reachable_count: usize,
}

impl FieldResult {
    /// A field in which nothing is reachable.
    pub fn unreachable(label: FieldLabel, len: usize) -> Self {
        Self {
            label,
            potential: vec![UNREACHABLE; len],
            next_hop: vec![None; len],
            reachable_count: 0,
        }
    }

    /// Potential of `cell`, [`UNREACHABLE`] outside the grid.
    pub fn potential(&self, cell: CellIndex) -> f64 {
        self.potential.get(cell.get()).copied().unwrap_or(UNREACHABLE)
    }

    /// Next hop from `cell`.
    pub fn next_hop(&self, cell: CellIndex) -> Option<CellIndex> {
        self.next_hop.get(cell.get()).copied().flatten()
    }

    /// Whether `cell` has finite potential.
    pub fn is_reachable(&self, cell: CellIndex) -> bool {
        self.potential(cell) < UNREACHABLE
    }

    /// Whether `cell` is reachable but has nowhere lower to go, i.e. it is
    /// one of this field's destinations.
    pub fn is_destination(&self, cell: CellIndex) -> bool {
        self.is_reachable(cell) && self.next_hop(cell).is_none()
    }
}

// ---------------------------------------------------------------------------
// Relaxation
// ---------------------------------------------------------------------------

/// Compute the potential field and next-hop table for `request` on `grid`.
///
/// # Errors
///
/// Returns [`WorldError::InvalidParams`] for negative or non-finite router
/// constants, [`WorldError::CellOutOfBounds`] for seeds outside the grid,
/// and [`WorldError::UnknownLot`] when a lot cell has no utilization entry.
pub fn compute_field(grid: &Grid, request: &FieldRequest) -> Result<FieldResult, WorldError> {
    request.params.validate()?;
    for &sink in &request.sinks {
        grid.check(sink)?;
    }
    for cell in grid.indices() {
        if let Some(lot) = grid.lot(cell)
            && (lot.get() >= request.lot_utilization.len()
                || lot.get() >= request.lot_admitting.len())
        {
            return Err(WorldError::UnknownLot { cell, lot });
        }
    }

    let label = request.label;
    let params = &request.params;
    let len = grid.len();
    let mut potential = vec![UNREACHABLE; len];
    let mut settled = vec![false; len];
    let mut is_seed = vec![false; len];
    let mut heap: MinHeap<CellIndex> = MinHeap::with_capacity(len);

    // --- Seeding ---
    for &sink in &request.sinks {
        if !passable(grid, label, sink, params.conductance_threshold) {
            continue;
        }
        let mut cost = params.seed_cost;
        if label == FieldLabel::Lots {
            let Some(lot) = grid.lot(sink) else {
                continue;
            };
            if !request.admitting(lot) {
                continue;
            }
            cost += params.bias_weight * request.utilization(lot);
        }
        if let Some(slot) = potential.get_mut(sink.get())
            && cost < *slot
        {
            *slot = cost;
            heap.push(cost, sink);
            if let Some(flag) = is_seed.get_mut(sink.get()) {
                *flag = true;
            }
        }
    }

    // --- Dijkstra ---
    let mut reachable_count = 0_usize;
    while let Some((dist, cell)) = heap.pop() {
        let Some(done) = settled.get_mut(cell.get()) else {
            continue;
        };
        if *done {
            continue;
        }
        *done = true;
        reachable_count += 1;

        for (dir, neighbor) in grid.neighbors(cell) {
            if settled.get(neighbor.get()).copied().unwrap_or(true) {
                continue;
            }
            if !passable(grid, label, neighbor, params.conductance_threshold) {
                continue;
            }
            // Exit fields: a road never inherits potential from a lot.
            if label.is_exit_field()
                && grid.region(cell) == Region::Lot
                && grid.region(neighbor) != Region::Lot
            {
                continue;
            }
            // A particle on `neighbor` travels into `cell`; charge entering `cell`.
            let step = edge_cost(grid, request, cell, dir.axis());
            let candidate = dist + step;
            if let Some(slot) = potential.get_mut(neighbor.get())
                && candidate < *slot
            {
                *slot = candidate;
                heap.push(candidate, neighbor);
            }
        }
    }

    let next_hop = derive_next_hops(grid, request, &potential, &is_seed);

    Ok(FieldResult {
        label,
        potential,
        next_hop,
        reachable_count,
    })
}

/// Whether `cell` may carry potential in a field with this label.
fn passable(grid: &Grid, label: FieldLabel, cell: CellIndex, threshold: f64) -> bool {
    if !grid.is_passable(cell, threshold) {
        return false;
    }
    !(grid.region(cell) == Region::Sink
        && matches!(label, FieldLabel::Lots | FieldLabel::CheckpointClosed))
}

/// Cost of entering `entered` along `axis`.
fn edge_cost(
    grid: &Grid,
    request: &FieldRequest,
    entered: CellIndex,
    axis: crate::grid::Axis,
) -> f64 {
    let threshold = request.params.conductance_threshold;
    let k = grid.conductance(entered).along(axis).max(threshold);
    let base = 1.0 / k;
    let penalty = match (request.label.applies_lot_penalty(), grid.lot(entered)) {
        (true, Some(lot)) if grid.region(entered) == Region::Lot => {
            let u = request.utilization(lot);
            request.params.alpha.mul_add(u.powf(request.params.beta), 1.0)
        }
        _ => 1.0,
    };
    base * penalty * grid.cost_multiplier(entered).max(0.0)
}

/// Point every reachable non-seed cell at the neighbor that minimizes
/// `potential(n) + edge_cost(n)`, the same quantity the relaxation
/// minimized. Ties go to the first neighbor in direction order. Only
/// strictly lower neighbors qualify, so hops always descend.
fn derive_next_hops(
    grid: &Grid,
    request: &FieldRequest,
    potential: &[f64],
    is_seed: &[bool],
) -> Vec<Option<CellIndex>> {
    let label = request.label;
    let mut next_hop = vec![None; potential.len()];
    for cell in grid.indices() {
        let here = potential.get(cell.get()).copied().unwrap_or(UNREACHABLE);
        if here >= UNREACHABLE || is_seed.get(cell.get()).copied().unwrap_or(false) {
            continue;
        }
        let from_lot = grid.region(cell) == Region::Lot;
        let mut best = UNREACHABLE;
        let mut hop = None;
        for (dir, neighbor) in grid.neighbors(cell) {
            let there = potential.get(neighbor.get()).copied().unwrap_or(UNREACHABLE);
            if there >= here {
                continue;
            }
            if label.is_exit_field() && !from_lot && grid.region(neighbor) == Region::Lot {
                continue;
            }
            let through = there + edge_cost(grid, request, neighbor, dir.axis());
            if through < best {
                best = through;
                hop = Some(neighbor);
            }
        }
        if let Some(slot) = next_hop.get_mut(cell.get()) {
            *slot = hop;
        }
    }
    next_hop
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::grid::{CellSpec, Conductance};

    fn spec(region: Region, lot: Option<LotId>) -> CellSpec {
        CellSpec {
            region,
            conductance: Conductance::uniform(1.0),
            lot,
            ..CellSpec::default()
        }
    }

    fn grid_from(rows: &[&str]) -> Grid {
        let size = rows.len();
        let mut grid = Grid::new(size).unwrap();
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let cell_spec = match ch {
                    '#' => spec(Region::Road, None),
                    'X' => spec(Region::Sink, None),
                    'a' => spec(Region::Lot, Some(LotId(0))),
                    'b' => spec(Region::Lot, Some(LotId(1))),
                    _ => CellSpec::default(),
                };
                grid.set_cell(grid.index(x, y).unwrap(), cell_spec).unwrap();
            }
        }
        grid
    }

    fn request(grid: &Grid, label: FieldLabel, lots: usize) -> FieldRequest {
        FieldRequest {
            label,
            sinks: FieldRequest::default_sinks(grid, label),
            lot_utilization: vec![0.0; lots],
            lot_admitting: vec![true; lots],
            params: RouterParams::default(),
        }
    }

    fn cell(grid: &Grid, x: usize, y: usize) -> CellIndex {
        grid.index(x, y).unwrap()
    }

    #[test]
    fn potential_grows_with_distance_on_uniform_3x3() {
        let grid = grid_from(&["###", "#X#", "###"]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::Checkpoint, 0)).unwrap();

        let center = field.potential(cell(&grid, 1, 1));
        let edge = field.potential(cell(&grid, 1, 0));
        let corner = field.potential(cell(&grid, 0, 0));
        assert!(center < edge);
        assert!(edge < corner);
        assert_eq!(field.reachable_count, 9);

        for c in grid.indices() {
            if let Some(hop) = field.next_hop(c) {
                assert!(field.potential(hop) < field.potential(c));
            }
        }
        assert!(field.next_hop(cell(&grid, 1, 1)).is_none());
    }

    #[test]
    fn ties_resolve_to_first_neighbor_in_order() {
        let grid = grid_from(&["###", "#X#", "###"]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::Checkpoint, 0)).unwrap();
        // Corner (0,0) has equal-potential neighbors (1,0) and (0,1); +x wins.
        assert_eq!(field.next_hop(cell(&grid, 0, 0)), Some(cell(&grid, 1, 0)));
    }

    #[test]
    fn empty_sink_set_is_all_unreachable() {
        let grid = grid_from(&["###", "###", "###"]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::Checkpoint, 0)).unwrap();
        assert_eq!(field.reachable_count, 0);
        assert!(grid.indices().all(|c| !field.is_reachable(c)));
        assert!(grid.indices().all(|c| field.next_hop(c).is_none()));
    }

    #[test]
    fn off_road_cells_stay_unreachable() {
        let grid = grid_from(&["#.#", "#X#", "..."]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::Checkpoint, 0)).unwrap();
        assert!(!field.is_reachable(cell(&grid, 1, 0)));
        assert!(!field.is_reachable(cell(&grid, 0, 2)));
        assert!(field.is_reachable(cell(&grid, 0, 0)));
    }

    #[test]
    fn draining_lot_is_not_seeded() {
        let grid = grid_from(&["a#b", "###", "..."]);
        let mut req = request(&grid, FieldLabel::Lots, 2);
        req.lot_admitting = vec![false, true];
        let field = compute_field(&grid, &req).unwrap();
        // Road next to lot a routes toward lot b instead.
        let road = cell(&grid, 1, 0);
        assert_eq!(field.next_hop(road), Some(cell(&grid, 2, 0)));
        assert!(field.next_hop(cell(&grid, 0, 1)).is_some());
    }

    #[test]
    fn lot_penalty_steers_toward_emptier_lot() {
        // Road row between two lots, equidistant from both.
        let grid = grid_from(&["a.b", "###", "..."]);
        let mut req = request(&grid, FieldLabel::Lots, 2);
        let even = compute_field(&grid, &req).unwrap();
        req.lot_utilization = vec![0.95, 0.0];
        let skewed = compute_field(&grid, &req).unwrap();
        let left_road = cell(&grid, 0, 1);
        assert_eq!(even.next_hop(left_road), Some(cell(&grid, 0, 0)));
        // The nearly full lot now costs more than driving to the other one.
        assert!(skewed.potential(left_road) > even.potential(left_road));
        assert_eq!(skewed.next_hop(left_road), Some(cell(&grid, 1, 1)));
    }

    #[test]
    fn next_hop_is_the_relaxed_predecessor() {
        let grid = grid_from(&["a.#b", "####", "#..#", "#..#"]);
        let mut req = request(&grid, FieldLabel::Lots, 2);
        req.lot_utilization = vec![0.9, 0.2];
        let field = compute_field(&grid, &req).unwrap();
        // The road right under the crowded lot turns away from it.
        assert_ne!(field.next_hop(cell(&grid, 0, 1)), Some(cell(&grid, 0, 0)));
        for c in grid.indices() {
            let Some(hop) = field.next_hop(c) else {
                continue;
            };
            let axis = grid.direction_between(c, hop).unwrap().axis();
            let through = field.potential(hop) + edge_cost(&grid, &req, hop, axis);
            assert!((field.potential(c) - through).abs() < 1e-9);
        }
    }

    #[test]
    fn exit_field_keeps_roads_off_lot_interiors() {
        // Lot a is a 2-cell shortcut between two road arms.
        let grid = grid_from(&["#aa#", "#..#", "#..#", "#XX#"]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::Checkpoint, 1)).unwrap();
        // Lot cells still have a way out.
        let lot_cell = cell(&grid, 1, 0);
        assert!(field.is_reachable(lot_cell));
        assert!(field.next_hop(lot_cell).is_some());
        // Road cells never point into the lot.
        for c in grid.indices() {
            if grid.region(c) == Region::Road
                && let Some(hop) = field.next_hop(c)
            {
                assert_ne!(grid.region(hop), Region::Lot);
            }
        }
    }

    #[test]
    fn closed_field_stops_at_checkpoint_approach() {
        let grid = grid_from(&["###", "#X#", "###"]);
        let field = compute_field(&grid, &request(&grid, FieldLabel::CheckpointClosed, 0)).unwrap();
        assert!(!field.is_reachable(cell(&grid, 1, 1)));
        assert!(field.is_destination(cell(&grid, 1, 0)));
        assert_eq!(field.next_hop(cell(&grid, 0, 0)), Some(cell(&grid, 1, 0)));
    }

    #[test]
    fn lots_field_ignores_seeds_outside_lots() {
        let grid = grid_from(&["#X#", "...", "..."]);
        let sinks = vec![cell(&grid, 2, 0)];
        let req = FieldRequest {
            label: FieldLabel::Lots,
            sinks,
            lot_utilization: Vec::new(),
            lot_admitting: Vec::new(),
            params: RouterParams::default(),
        };
        let field = compute_field(&grid, &req).unwrap();
        // Road seeds are ignored without a lot; nothing is reachable.
        assert_eq!(field.reachable_count, 0);
    }

    #[test]
    fn negative_params_rejected() {
        let grid = grid_from(&["#X#", "...", "..."]);
        let mut req = request(&grid, FieldLabel::Checkpoint, 0);
        req.params.alpha = -1.0;
        assert!(compute_field(&grid, &req).is_err());
    }

    #[test]
    fn missing_lot_entry_is_a_configuration_error() {
        let grid = grid_from(&["a#X", "...", "..."]);
        let req = request(&grid, FieldLabel::Checkpoint, 0);
        assert!(matches!(
            compute_field(&grid, &req),
            Err(WorldError::UnknownLot { .. })
        ));
    }
}
