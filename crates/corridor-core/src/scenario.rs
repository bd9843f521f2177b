//! Scenario files: configuration plus an ASCII corridor layout.
//!
//! ```yaml
//! name: baseline
//! config:
//!   simulation:
//!     dt_s: 5.0
//! layout:
//!   - "S###=##X"
//!   - "..aa...."
//! lots:
//!   - key: a
//!     name: north
//!     capacity: 40.0
//! ```
//!
//! Layout legend:
//!
//! | Symbol | Cell |
//! |--------|------|
//! | `.` | off-road |
//! | `#` | road |
//! | `=` | road with intersection friction |
//! | `S` | road source |
//! | `P` | park source |
//! | `X` | checkpoint |
//! | `a`-`z` | lot cell, keyed into the `lots` table |
//!
//! Rows must all have the grid's side length and there must be exactly as
//! many rows as columns.

use std::collections::BTreeMap;
use std::path::Path;

use corridor_types::{CellIndex, LotId, Region};
use corridor_world::{CellSpec, Conductance, Grid, WorldError};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, CorridorConfig};
use crate::lots::Lot;

/// Errors from loading or building a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Failed to read the scenario file.
    #[error("failed to read scenario file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse the scenario YAML.
    #[error("failed to parse scenario YAML: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// The embedded configuration is invalid.
    #[error("scenario {name}: {source}")]
    Config {
        /// Scenario name.
        name: String,
        /// The configuration error.
        source: ConfigError,
    },

    /// The layout has no rows.
    #[error("scenario {name}: layout is empty")]
    EmptyLayout {
        /// Scenario name.
        name: String,
    },

    /// A row's length differs from the number of rows.
    #[error("scenario {name}: row {row} has {len} cells, expected {expected}")]
    NotSquare {
        /// Scenario name.
        name: String,
        /// Offending row.
        row: usize,
        /// Its length.
        len: usize,
        /// Required length.
        expected: usize,
    },

    /// A layout symbol is not in the legend.
    #[error("scenario {name}: unknown symbol {symbol:?} at ({x}, {y})")]
    UnknownSymbol {
        /// Scenario name.
        name: String,
        /// The symbol.
        symbol: char,
        /// Column.
        x: usize,
        /// Row.
        y: usize,
    },

    /// A lot key in the layout has no entry in the lots table.
    #[error("scenario {name}: lot key {key:?} is not in the lots table")]
    UnknownLot {
        /// Scenario name.
        name: String,
        /// The key.
        key: char,
    },

    /// A lots table entry is invalid.
    #[error("scenario {name}: lot {key:?}: {reason}")]
    InvalidLot {
        /// Scenario name.
        name: String,
        /// The key.
        key: char,
        /// What is wrong.
        reason: String,
    },

    /// The layout has no checkpoint cell.
    #[error("scenario {name}: layout has no checkpoint cell")]
    NoCheckpoint {
        /// Scenario name.
        name: String,
    },

    /// Grid construction failed.
    #[error("scenario grid: {source}")]
    World {
        /// The world error.
        #[from]
        source: WorldError,
    },
}

/// One entry of the lots table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotSpec {
    /// Layout symbol.
    pub key: char,
    /// Human-readable name.
    pub name: String,
    /// Capacity in mass.
    pub capacity: f64,
}

/// A scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Scenario name, used in logs and reports.
    pub name: String,
    /// Simulation configuration.
    #[serde(default)]
    pub config: CorridorConfig,
    /// ASCII layout rows, top row first.
    pub layout: Vec<String>,
    /// Lots referenced by the layout.
    #[serde(default)]
    pub lots: Vec<LotSpec>,
}

/// How a source injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Spawns moving restricted or cleared units on the road.
    Road,
    /// Spawns units held in a park until their dwell elapses.
    Park,
}

/// An injection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    /// Cell units appear in.
    pub cell: CellIndex,
    /// Injection behavior.
    pub kind: SourceKind,
}

/// Grid, sources and lots built from a layout.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// The grid.
    pub grid: Grid,
    /// Sources in row-major order.
    pub sources: Vec<Source>,
    /// Lots in table order.
    pub lots: Vec<Lot>,
}

impl ScenarioSpec {
    /// Load a scenario file.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] if the file cannot be read or parsed, or the
    /// embedded configuration is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a scenario and validate its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Yaml`] or [`ScenarioError::Config`].
    pub fn parse(yaml: &str) -> Result<Self, ScenarioError> {
        let spec: Self = serde_yml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate the embedded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Config`].
    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.config
            .validate()
            .map_err(|source| ScenarioError::Config {
                name: self.name.clone(),
                source,
            })
    }

    /// Build the grid, sources and lots.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] for a malformed layout or lots table.
    pub fn build_geometry(&self) -> Result<Geometry, ScenarioError> {
        let name = || self.name.clone();
        let size = self.layout.len();
        if size == 0 {
            return Err(ScenarioError::EmptyLayout { name: name() });
        }

        let mut keys: BTreeMap<char, LotId> = BTreeMap::new();
        for (index, spec) in self.lots.iter().enumerate() {
            if !spec.key.is_ascii_lowercase() {
                return Err(self.invalid_lot(spec.key, "key must be a lowercase letter"));
            }
            if !(spec.capacity.is_finite() && spec.capacity > 0.0) {
                return Err(self.invalid_lot(spec.key, "capacity must be positive"));
            }
            if keys.insert(spec.key, LotId(index)).is_some() {
                return Err(self.invalid_lot(spec.key, "key appears twice"));
            }
        }

        let friction = self.config.transport.intersection.friction;
        let mut grid = Grid::new(size)?;
        let mut sources = Vec::new();
        let mut lot_cells: Vec<Vec<CellIndex>> = vec![Vec::new(); self.lots.len()];
        let mut has_checkpoint = false;

        for (y, row) in self.layout.iter().enumerate() {
            let len = row.chars().count();
            if len != size {
                return Err(ScenarioError::NotSquare {
                    name: name(),
                    row: y,
                    len,
                    expected: size,
                });
            }
            for (x, symbol) in row.chars().enumerate() {
                let Some(cell) = grid.index(x, y) else {
                    continue;
                };
                let mut spec = CellSpec {
                    region: Region::Road,
                    conductance: Conductance::uniform(1.0),
                    ..CellSpec::default()
                };
                match symbol {
                    '.' => spec = CellSpec::default(),
                    '#' => {}
                    '=' => spec.friction = friction,
                    'S' => sources.push(Source {
                        cell,
                        kind: SourceKind::Road,
                    }),
                    'P' => {
                        spec.region = Region::Park;
                        sources.push(Source {
                            cell,
                            kind: SourceKind::Park,
                        });
                    }
                    'X' => {
                        spec.region = Region::Sink;
                        has_checkpoint = true;
                    }
                    key if key.is_ascii_lowercase() => {
                        let lot = *keys.get(&key).ok_or_else(|| ScenarioError::UnknownLot {
                            name: name(),
                            key,
                        })?;
                        spec.region = Region::Lot;
                        spec.lot = Some(lot);
                        if let Some(cells) = lot_cells.get_mut(lot.get()) {
                            cells.push(cell);
                        }
                    }
                    other => {
                        return Err(ScenarioError::UnknownSymbol {
                            name: name(),
                            symbol: other,
                            x,
                            y,
                        });
                    }
                }
                grid.set_cell(cell, spec)?;
            }
        }

        if !has_checkpoint {
            return Err(ScenarioError::NoCheckpoint { name: name() });
        }

        let mut lots = Vec::with_capacity(self.lots.len());
        for ((index, spec), cells) in self.lots.iter().enumerate().zip(lot_cells) {
            if cells.is_empty() {
                return Err(self.invalid_lot(spec.key, "no layout cells"));
            }
            lots.push(Lot::new(LotId(index), spec.name.clone(), cells, spec.capacity));
        }

        Ok(Geometry {
            grid,
            sources,
            lots,
        })
    }

    fn invalid_lot(&self, key: char, reason: &str) -> ScenarioError {
        ScenarioError::InvalidLot {
            name: self.name.clone(),
            key,
            reason: reason.to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: small
config:
  simulation:
    dt_s: 2.0
layout:
  - "S#=X"
  - "P#.."
  - ".aa."
  - "...."
lots:
  - key: a
    name: north
    capacity: 12.0
"#;

    #[test]
    fn parses_and_builds_geometry() {
        let spec = ScenarioSpec::parse(YAML).unwrap();
        assert_eq!(spec.name, "small");
        assert!((spec.config.simulation.dt_s - 2.0).abs() < f64::EPSILON);

        let geometry = spec.build_geometry().unwrap();
        let grid = &geometry.grid;
        assert_eq!(grid.size(), 4);
        assert_eq!(grid.region(CellIndex(3)), Region::Sink);
        assert_eq!(grid.region(CellIndex(4)), Region::Park);
        assert!((grid.friction(CellIndex(2)) - 0.6).abs() < f64::EPSILON);
        assert_eq!(grid.lot(CellIndex(9)), Some(LotId(0)));
        assert_eq!(geometry.sources.len(), 2);
        assert_eq!(geometry.sources[1].kind, SourceKind::Park);
        assert_eq!(geometry.lots[0].cells, vec![CellIndex(9), CellIndex(10)]);
        assert!((geometry.lots[0].capacity - 12.0).abs() < f64::EPSILON);
    }

    fn spec(layout: &[&str], lots: Vec<LotSpec>) -> ScenarioSpec {
        ScenarioSpec {
            name: "t".to_owned(),
            config: CorridorConfig::default(),
            layout: layout.iter().map(|r| (*r).to_owned()).collect(),
            lots,
        }
    }

    #[test]
    fn ragged_layout_rejected() {
        let result = spec(&["S#X", "##", "..."], Vec::new()).build_geometry();
        assert!(matches!(result, Err(ScenarioError::NotSquare { row: 1, .. })));
    }

    #[test]
    fn unknown_symbol_rejected() {
        let result = spec(&["S?", "X."], Vec::new()).build_geometry();
        assert!(matches!(
            result,
            Err(ScenarioError::UnknownSymbol { symbol: '?', x: 1, y: 0, .. })
        ));
    }

    #[test]
    fn lot_key_must_be_declared() {
        let result = spec(&["Sb", "X."], Vec::new()).build_geometry();
        assert!(matches!(result, Err(ScenarioError::UnknownLot { key: 'b', .. })));
    }

    #[test]
    fn declared_lot_needs_cells() {
        let lots = vec![LotSpec {
            key: 'a',
            name: "a".to_owned(),
            capacity: 3.0,
        }];
        let result = spec(&["S#", "X."], lots).build_geometry();
        assert!(matches!(result, Err(ScenarioError::InvalidLot { key: 'a', .. })));
    }

    #[test]
    fn checkpoint_required() {
        let result = spec(&["S#", ".."], Vec::new()).build_geometry();
        assert!(matches!(result, Err(ScenarioError::NoCheckpoint { .. })));
    }

    #[test]
    fn invalid_embedded_config_rejected() {
        let yaml = "name: bad\nconfig:\n  checkpoint:\n    lanes: 0\nlayout: [\"SX\", \"..\"]\n";
        assert!(matches!(
            ScenarioSpec::parse(yaml),
            Err(ScenarioError::Config { .. })
        ));
    }
}
