//! Grid geometry and potential field routing for the corridor simulation.
//!
//! This crate holds everything that depends only on the static shape of the
//! corridor: the square cell grid, the priority queue, the capacity-aware
//! potential field router, and the message protocol and background thread
//! used to compute fields off the tick loop.
//!
//! # Modules
//!
//! - [`grid`] -- Cell indexing, neighbor iteration, region and conductance
//! - [`heap`] -- Binary min-heap keyed by `f64` cost
//! - [`field`] -- Multi-source Dijkstra potential field and next-hop table
//! - [`protocol`] -- Owned request/response messages with epoch tokens
//! - [`worker`] -- Dedicated router thread fed over channels
//! - [`error`] -- Error type for this crate

pub mod error;
pub mod field;
pub mod grid;
pub mod heap;
pub mod protocol;
pub mod worker;

pub use error::WorldError;
pub use field::{FieldRequest, FieldResult, RouterParams, UNREACHABLE, compute_field};
pub use grid::{Axis, CellSpec, Conductance, Direction, Grid};
pub use heap::MinHeap;
pub use protocol::{RouterOutcome, RouterRequest, RouterResponse, handle_request};
pub use worker::RouterWorker;
