//! Shared type definitions for the border corridor freight simulation.
//!
//! This crate is the single source of truth for the identifiers, enums and
//! snapshot structs used across the workspace.
//!
//! # Modules
//!
//! - [`ids`] -- Integer newtypes for cells, particles and lots
//! - [`enums`] -- Region tags, customs classes, lifecycle and admission states
//! - [`structs`] -- Metrics and rendering snapshots

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    AdmissionState, CustomsClass, DelayCause, FieldLabel, ParticleState, Region, StallReason,
};
pub use ids::{CellIndex, LotId, ParticleId};
pub use structs::{DelayBreakdown, LotSnapshot, MetricsSnapshot, ParticleView};
