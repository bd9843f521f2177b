//! Square simulation grid: cell indexing, neighbor iteration, and the static
//! per-cell attributes the router and drift engine read.
//!
//! Cells are stored row-major: cell `(x, y)` has index `y * size + x`. The
//! grid holds only geometry (region, conductance, lot membership, commuter
//! friction, cost multiplier). Dynamic state such as cell mass and occupant
//! lists lives with the particle arena in `corridor-core`, so a [`Grid`] can
//! be cloned into a router request without racing the tick loop.

use corridor_types::{CellIndex, LotId, Region};
use serde::{Deserialize, Serialize};

use crate::error::WorldError;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// One of the four grid directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Toward increasing x.
    PosX,
    /// Toward decreasing x.
    NegX,
    /// Toward increasing y.
    PosY,
    /// Toward decreasing y.
    NegY,
}

/// Axis a direction moves along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal.
    X,
    /// Vertical.
    Y,
}

impl Direction {
    /// Neighbor iteration order. Next-hop tie-breaking depends on it.
    pub const ALL: [Self; 4] = [Self::PosX, Self::NegX, Self::PosY, Self::NegY];

    /// Dense index in `0..4`, used for per-edge tallies.
    pub const fn index(self) -> usize {
        match self {
            Self::PosX => 0,
            Self::NegX => 1,
            Self::PosY => 2,
            Self::NegY => 3,
        }
    }

    /// The reverse direction.
    pub const fn opposite(self) -> Self {
        match self {
            Self::PosX => Self::NegX,
            Self::NegX => Self::PosX,
            Self::PosY => Self::NegY,
            Self::NegY => Self::PosY,
        }
    }

    /// The axis this direction moves along.
    pub const fn axis(self) -> Axis {
        match self {
            Self::PosX | Self::NegX => Axis::X,
            Self::PosY | Self::NegY => Axis::Y,
        }
    }

    /// Unit displacement `(dx, dy)` in cell units.
    pub const fn unit(self) -> (f64, f64) {
        match self {
            Self::PosX => (1.0, 0.0),
            Self::NegX => (-1.0, 0.0),
            Self::PosY => (0.0, 1.0),
            Self::NegY => (0.0, -1.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Conductance
// ---------------------------------------------------------------------------

/// Traversability of a cell along each axis. Higher is cheaper to cross.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Conductance {
    /// Conductance for horizontal movement.
    pub x: f64,
    /// Conductance for vertical movement.
    pub y: f64,
}

impl Conductance {
    /// Same conductance on both axes.
    pub const fn uniform(k: f64) -> Self {
        Self { x: k, y: k }
    }

    /// Conductance along `axis`.
    pub const fn along(self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// A cell is impassable when both components fall below `threshold`.
    pub fn is_passable(self, threshold: f64) -> bool {
        self.x >= threshold || self.y >= threshold
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Static attributes of one cell, used to build a grid cell by cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    /// Region tag.
    pub region: Region,
    /// Conductance pair.
    pub conductance: Conductance,
    /// Owning lot for [`Region::Lot`] cells.
    pub lot: Option<LotId>,
    /// Exogenous commuter friction, added to perceived density.
    pub friction: f64,
    /// Multiplier applied to the router's edge cost for entering this cell.
    pub cost_multiplier: f64,
}

impl Default for CellSpec {
    fn default() -> Self {
        Self {
            region: Region::OffRoad,
            conductance: Conductance::default(),
            lot: None,
            friction: 0.0,
            cost_multiplier: 1.0,
        }
    }
}

/// An N×N grid of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Side length.
    size: usize,
    /// Per-cell static attributes, row-major.
    cells: Vec<CellSpec>,
}

impl Grid {
    /// Create a grid of off-road cells.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidGridSize`] if `size` is zero or its
    /// square overflows.
    pub fn new(size: usize) -> Result<Self, WorldError> {
        let len = size
            .checked_mul(size)
            .filter(|&n| n > 0)
            .ok_or(WorldError::InvalidGridSize(size))?;
        Ok(Self {
            size,
            cells: vec![CellSpec::default(); len],
        })
    }

    /// Side length of the grid.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells. Never true for a constructed grid.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Index of cell `(x, y)`, or `None` outside the grid.
    pub fn index(&self, x: usize, y: usize) -> Option<CellIndex> {
        (x < self.size && y < self.size).then(|| CellIndex(y * self.size + x))
    }

    /// Index of the cell containing continuous position `(x, y)`.
    pub fn index_at(&self, x: f64, y: f64) -> Option<CellIndex> {
        if x < 0.0 || y < 0.0 || !x.is_finite() || !y.is_finite() {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (cx, cy) = (x.floor() as usize, y.floor() as usize);
        self.index(cx, cy)
    }

    /// Column and row of a cell.
    pub const fn coords(&self, cell: CellIndex) -> (usize, usize) {
        (cell.0 % self.size, cell.0 / self.size)
    }

    /// Continuous position of a cell's center.
    pub fn center(&self, cell: CellIndex) -> (f64, f64) {
        let (x, y) = self.coords(cell);
        (x as f64 + 0.5, y as f64 + 0.5)
    }

    /// Whether `cell` lies inside the grid.
    pub fn contains(&self, cell: CellIndex) -> bool {
        cell.0 < self.cells.len()
    }

    /// Check that `cell` lies inside the grid.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::CellOutOfBounds`] otherwise.
    pub fn check(&self, cell: CellIndex) -> Result<(), WorldError> {
        if self.contains(cell) {
            Ok(())
        } else {
            Err(WorldError::CellOutOfBounds {
                index: cell,
                len: self.cells.len(),
            })
        }
    }

    /// The neighbor of `cell` in direction `dir`, if inside the grid.
    pub fn neighbor(&self, cell: CellIndex, dir: Direction) -> Option<CellIndex> {
        let (x, y) = self.coords(cell);
        let (nx, ny) = match dir {
            Direction::PosX => (x.checked_add(1)?, y),
            Direction::NegX => (x.checked_sub(1)?, y),
            Direction::PosY => (x, y.checked_add(1)?),
            Direction::NegY => (x, y.checked_sub(1)?),
        };
        self.index(nx, ny)
    }

    /// The 4-connected neighbors of `cell` in [`Direction::ALL`] order.
    pub fn neighbors(&self, cell: CellIndex) -> impl Iterator<Item = (Direction, CellIndex)> + '_ {
        Direction::ALL
            .into_iter()
            .filter_map(move |dir| self.neighbor(cell, dir).map(|n| (dir, n)))
    }

    /// Direction from `from` to an adjacent cell `to`.
    pub fn direction_between(&self, from: CellIndex, to: CellIndex) -> Option<Direction> {
        self.neighbors(from)
            .find(|&(_, n)| n == to)
            .map(|(dir, _)| dir)
    }

    // -------------------------------------------------------------------
    // Cell attributes
    // -------------------------------------------------------------------

    /// Full static attributes of a cell.
    pub fn cell(&self, cell: CellIndex) -> Option<&CellSpec> {
        self.cells.get(cell.0)
    }

    /// Overwrite the static attributes of a cell.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::CellOutOfBounds`] if `cell` is outside the grid.
    pub fn set_cell(&mut self, cell: CellIndex, spec: CellSpec) -> Result<(), WorldError> {
        let len = self.cells.len();
        let slot = self
            .cells
            .get_mut(cell.0)
            .ok_or(WorldError::CellOutOfBounds { index: cell, len })?;
        *slot = spec;
        Ok(())
    }

    /// Region tag of a cell. Cells outside the grid read as off-road.
    pub fn region(&self, cell: CellIndex) -> Region {
        self.cells.get(cell.0).map_or(Region::OffRoad, |c| c.region)
    }

    /// Conductance of a cell. Cells outside the grid read as zero.
    pub fn conductance(&self, cell: CellIndex) -> Conductance {
        self.cells
            .get(cell.0)
            .map_or_else(Conductance::default, |c| c.conductance)
    }

    /// Owning lot of a cell, if any.
    pub fn lot(&self, cell: CellIndex) -> Option<LotId> {
        self.cells.get(cell.0).and_then(|c| c.lot)
    }

    /// Commuter friction of a cell.
    pub fn friction(&self, cell: CellIndex) -> f64 {
        self.cells.get(cell.0).map_or(0.0, |c| c.friction)
    }

    /// Router cost multiplier of a cell.
    pub fn cost_multiplier(&self, cell: CellIndex) -> f64 {
        self.cells.get(cell.0).map_or(1.0, |c| c.cost_multiplier)
    }

    /// Whether a cell is drivable and conductive enough to traverse.
    pub fn is_passable(&self, cell: CellIndex, threshold: f64) -> bool {
        self.cells
            .get(cell.0)
            .is_some_and(|c| c.region.is_drivable() && c.conductance.is_passable(threshold))
    }

    /// All cells carrying `region`, in index order.
    pub fn cells_with_region(&self, region: Region) -> Vec<CellIndex> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.region == region)
            .map(|(i, _)| CellIndex(i))
            .collect()
    }

    /// All cells belonging to `lot`, in index order.
    pub fn lot_cells(&self, lot: LotId) -> Vec<CellIndex> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.lot == Some(lot))
            .map(|(i, _)| CellIndex(i))
            .collect()
    }

    /// Iterate over all cell indices.
    pub fn indices(&self) -> impl Iterator<Item = CellIndex> {
        (0..self.cells.len()).map(CellIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn road() -> CellSpec {
        CellSpec {
            region: Region::Road,
            conductance: Conductance::uniform(1.0),
            ..CellSpec::default()
        }
    }

    #[test]
    fn zero_size_grid_rejected() {
        assert!(Grid::new(0).is_err());
    }

    #[test]
    fn index_and_coords_are_inverse() {
        let grid = Grid::new(4).unwrap_or_else(|_| unreachable_grid());
        let cell = grid.index(3, 2);
        assert_eq!(cell, Some(CellIndex(11)));
        assert_eq!(grid.coords(CellIndex(11)), (3, 2));
        assert!(grid.index(4, 0).is_none());
    }

    #[test]
    fn corner_has_two_neighbors_in_fixed_order() {
        let grid = Grid::new(3).unwrap_or_else(|_| unreachable_grid());
        let neighbors: Vec<(Direction, CellIndex)> = grid.neighbors(CellIndex(0)).collect();
        assert_eq!(
            neighbors,
            vec![(Direction::PosX, CellIndex(1)), (Direction::PosY, CellIndex(3))]
        );
    }

    #[test]
    fn center_cell_has_four_neighbors() {
        let grid = Grid::new(3).unwrap_or_else(|_| unreachable_grid());
        assert_eq!(grid.neighbors(CellIndex(4)).count(), 4);
        assert_eq!(
            grid.direction_between(CellIndex(4), CellIndex(1)),
            Some(Direction::NegY)
        );
    }

    #[test]
    fn index_at_floors_continuous_positions() {
        let grid = Grid::new(3).unwrap_or_else(|_| unreachable_grid());
        assert_eq!(grid.index_at(1.99, 0.2), Some(CellIndex(1)));
        assert_eq!(grid.index_at(-0.1, 0.2), None);
        assert_eq!(grid.index_at(3.0, 0.2), None);
    }

    #[test]
    fn off_road_and_low_conductance_are_impassable() {
        let mut grid = Grid::new(2).unwrap_or_else(|_| unreachable_grid());
        let _ = grid.set_cell(CellIndex(0), road());
        let _ = grid.set_cell(
            CellIndex(1),
            CellSpec {
                conductance: Conductance { x: 0.001, y: 0.0 },
                ..road()
            },
        );
        assert!(grid.is_passable(CellIndex(0), 0.01));
        assert!(!grid.is_passable(CellIndex(1), 0.01));
        assert!(!grid.is_passable(CellIndex(2), 0.01));
    }

    #[test]
    fn set_cell_out_of_bounds_errors() {
        let mut grid = Grid::new(2).unwrap_or_else(|_| unreachable_grid());
        assert!(grid.set_cell(CellIndex(9), road()).is_err());
    }

    fn unreachable_grid() -> Grid {
        Grid {
            size: 1,
            cells: vec![CellSpec::default()],
        }
    }
}
