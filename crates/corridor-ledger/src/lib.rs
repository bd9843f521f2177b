//! Mass ledger for the corridor simulation.
//!
//! Every truck-unit of mass is tracked through this ledger from the moment it
//! is injected until it leaves through the checkpoint. Mass is never created
//! except by injection and never destroyed except by a checkpoint exit. The
//! conservation law is checked at the end of every tick.
//!
//! # Architecture
//!
//! - [`ledger`] -- The [`MassLedger`]: append-only log of injections and exits.
//! - [`conservation`] -- Conservation law verification and anomaly reporting.
//!
//! # Conservation Law
//!
//! At every sample point T:
//!
//! ```text
//! injected(T) - exited(T) == sum(mass of live particles at T)
//! ```
//!
//! within a small numeric tolerance. A violation produces a [`MassAnomaly`].
//! The ledger never panics; it returns errors.
//!
//! # Usage
//!
//! ```
//! use corridor_ledger::MassLedger;
//! use corridor_ledger::conservation::ConservationResult;
//! use corridor_types::ParticleId;
//!
//! let mut ledger = MassLedger::new();
//! ledger.record_injection(1, ParticleId(0), 1.0).ok();
//! ledger.record_injection(1, ParticleId(1), 1.0).ok();
//! ledger.record_exit(2, ParticleId(0)).ok();
//!
//! // One unit still on the grid.
//! assert_eq!(ledger.verify_conservation(2, 1.0), ConservationResult::Balanced);
//! ```

pub mod conservation;
pub mod ledger;

pub use conservation::ConservationResult;
pub use ledger::{MassEntry, MassFlow, MassLedger};

use corridor_types::ParticleId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when recording ledger entries.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Mass must be strictly positive and finite.
    #[error("ledger mass must be positive and finite, got {mass}")]
    InvalidMass {
        /// The invalid mass.
        mass: f64,
    },

    /// A particle was injected twice.
    #[error("particle {particle} is already live in the ledger")]
    DuplicateInjection {
        /// The repeated particle.
        particle: ParticleId,
    },

    /// A particle exited without being live.
    #[error("particle {particle} exited but is not live in the ledger")]
    UnknownParticle {
        /// The unknown particle.
        particle: ParticleId,
    },
}

// ---------------------------------------------------------------------------
// Anomaly type
// ---------------------------------------------------------------------------

/// A conservation law violation detected at a sample point.
#[derive(Debug, Clone, PartialEq)]
pub struct MassAnomaly {
    /// The tick at which the violation was detected.
    pub tick: u64,
    /// Cumulative injected mass.
    pub injected: f64,
    /// Cumulative exited mass.
    pub exited: f64,
    /// Mass actually present on the grid.
    pub active: f64,
    /// `injected - exited - active`.
    pub discrepancy: f64,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for MassAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
