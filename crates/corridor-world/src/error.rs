//! Error types for the `corridor-world` crate.
//!
//! All fallible operations in this crate return [`WorldError`] through the
//! standard [`Result`] type alias.

use corridor_types::{CellIndex, LotId};

/// Errors that can occur during grid construction, routing, or worker
/// communication.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The grid side length must be at least 1.
    #[error("grid size must be at least 1, got {0}")]
    InvalidGridSize(usize),

    /// A cell index is outside the grid.
    #[error("cell {index} is outside a grid of {len} cells")]
    CellOutOfBounds {
        /// The offending index.
        index: CellIndex,
        /// Number of cells in the grid.
        len: usize,
    },

    /// A per-cell or per-lot array does not match the expected length.
    #[error("{what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        /// Which array is malformed.
        what: &'static str,
        /// Expected number of entries.
        expected: usize,
        /// Actual number of entries.
        actual: usize,
    },

    /// A cell refers to a lot that the request does not describe.
    #[error("cell {cell} refers to unknown lot {lot}")]
    UnknownLot {
        /// The cell carrying the reference.
        cell: CellIndex,
        /// The missing lot.
        lot: LotId,
    },

    /// A router parameter is out of range.
    #[error("invalid router parameter: {reason}")]
    InvalidParams {
        /// Explanation of what is wrong.
        reason: String,
    },

    /// The router worker thread could not be started.
    #[error("failed to spawn router worker: {source}")]
    WorkerSpawn {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The router worker has shut down and can no longer take requests.
    #[error("router worker disconnected")]
    WorkerDisconnected,
}
