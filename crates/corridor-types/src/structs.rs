//! Snapshot structs shared between the engine and its consumers.
//!
//! These are plain data: the core produces them once per tick or sample and
//! the runner and the CLI read them. Nothing here refers back
//! into live simulation state.

use serde::{Deserialize, Serialize};

use crate::enums::{AdmissionState, CustomsClass, DelayCause, ParticleState, StallReason};
use crate::ids::{CellIndex, LotId, ParticleId};

/// Delay truck-hours broken out by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayBreakdown {
    /// Slowdown and stalls on the road network.
    pub congestion: f64,
    /// Waiting for a lot to admit.
    pub lot_wait: f64,
    /// Waiting in the checkpoint queue (including closed-checkpoint holds).
    pub checkpoint_queue: f64,
    /// Time spent in a checkpoint service lane.
    pub checkpoint_service: f64,
}

impl DelayBreakdown {
    /// Add `hours` to the bucket for `cause`.
    pub fn add(&mut self, cause: DelayCause, hours: f64) {
        match cause {
            DelayCause::Congestion => self.congestion += hours,
            DelayCause::LotWait => self.lot_wait += hours,
            DelayCause::CheckpointQueue => self.checkpoint_queue += hours,
            DelayCause::CheckpointService => self.checkpoint_service += hours,
        }
    }

    /// Sum over all causes.
    pub fn total(&self) -> f64 {
        self.congestion + self.lot_wait + self.checkpoint_queue + self.checkpoint_service
    }
}

/// Fill state of one lot at a sample point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotSnapshot {
    /// Lot index.
    pub id: LotId,
    /// Human-readable lot name.
    pub name: String,
    /// Occupied mass over capacity, in `[0, 1]`.
    pub fill_ratio: f64,
    /// Occupied mass.
    pub occupied_mass: f64,
    /// Current admission state.
    pub state: AdmissionState,
}

/// Metrics surface produced after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tick number that just completed (1-based).
    pub tick: u64,
    /// Simulated time at the end of the tick, in seconds.
    pub sim_time_s: f64,
    /// Cumulative injected mass.
    pub injected_mass: f64,
    /// Cumulative mass that exited through the checkpoint.
    pub exited_mass: f64,
    /// Particles currently alive.
    pub active_particles: u64,
    /// Mass currently alive.
    pub active_mass: f64,
    /// Cumulative delay truck-hours by cause.
    pub delay_hours: DelayBreakdown,
    /// Per-lot fill at the end of the tick.
    pub lots: Vec<LotSnapshot>,
    /// Busy lanes over total lanes at the end of the tick.
    pub lane_utilization: f64,
    /// Particles waiting in the checkpoint queue (not yet in a lane).
    pub checkpoint_queue_len: u64,
    /// Cumulative checkpoint completions.
    pub completions: u64,
    /// Cumulative restricted-to-cleared conversions.
    pub conversions: u64,
    /// Distinct particles that were ever stalled by a full lot.
    pub lot_full_stalled: u64,
    /// Particles stalled at the end of the tick.
    pub stalled_now: u64,
    /// Router rebuilds installed so far.
    pub router_rebuilds: u64,
    /// CFL sub-steps used by the last tick.
    pub substeps: u32,
}

/// Read-only view of one particle for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleView {
    /// Particle id.
    pub id: ParticleId,
    /// Continuous x position in cell units.
    pub x: f64,
    /// Continuous y position in cell units.
    pub y: f64,
    /// Owning cell.
    pub cell: CellIndex,
    /// Customs class.
    pub class: CustomsClass,
    /// Lifecycle state.
    pub state: ParticleState,
    /// Current stall reason, if stalled.
    pub stall: Option<StallReason>,
}
