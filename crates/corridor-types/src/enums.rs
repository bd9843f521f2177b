//! Enumeration types for the corridor simulation.
//!
//! Region tags, customs classes, particle lifecycle states, lot admission
//! states, stall reasons, routing field labels and delay causes.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// What a grid cell represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Not part of the road network. Impassable.
    #[default]
    OffRoad,
    /// Public road.
    Road,
    /// Industrial park or other non-lot waiting zone.
    Park,
    /// Part of a storage lot.
    Lot,
    /// Checkpoint cell. The only place mass can leave the system.
    Sink,
}

impl Region {
    /// Whether trucks can drive through this region at all.
    pub const fn is_drivable(self) -> bool {
        !matches!(self, Self::OffRoad)
    }
}

// ---------------------------------------------------------------------------
// Particles
// ---------------------------------------------------------------------------

/// Customs class of a truck-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomsClass {
    /// Must dwell in a lot before it may head to the checkpoint.
    Restricted,
    /// Cleared for export; routes toward the checkpoint.
    Cleared,
}

/// Lifecycle state of a truck-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleState {
    /// Driving on the road network.
    Road,
    /// Parked inside a lot, dwelling before conversion.
    Lot,
    /// Held in a park (non-lot waiting zone) before release.
    Park,
    /// Arrived at the checkpoint; queued or in a service lane.
    Cleared,
    /// Served by a lane and leaving the system. Terminal.
    Departing,
}

impl ParticleState {
    /// Whether the drift engine moves particles in this state.
    pub const fn is_moving(self) -> bool {
        matches!(self, Self::Road)
    }
}

/// Why a particle did not move during a sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// The next lot is full, draining or cooling down and no reroute exists.
    LotFull,
    /// The next road cell is at its mass cap and no reroute exists.
    RoadCapacity,
    /// The particle's field has no next hop from here.
    NoRoute,
    /// Restricted mass with no admitting lot reachable; waits for storage
    /// to reopen.
    NoAdmittingLot,
    /// Holding at the checkpoint approach while the checkpoint is closed.
    CheckpointClosed,
    /// Stopped by an intersection red window.
    Intersection,
}

impl StallReason {
    /// The delay bucket that time spent in this stall is charged to.
    pub const fn delay_cause(self) -> DelayCause {
        match self {
            Self::LotFull | Self::NoAdmittingLot => DelayCause::LotWait,
            Self::CheckpointClosed => DelayCause::CheckpointQueue,
            Self::RoadCapacity | Self::NoRoute | Self::Intersection => DelayCause::Congestion,
        }
    }
}

// ---------------------------------------------------------------------------
// Lots
// ---------------------------------------------------------------------------

/// Admission state of a storage lot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    /// Accepting new mass until the admission cutoff is reached.
    #[default]
    Admitting,
    /// Full; only releasing mass until empty.
    Draining,
    /// Empty, waiting out the cooldown before admitting again.
    Cooldown,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Identifies one of the coexisting potential fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLabel {
    /// Rooted at admitting lots; used by restricted mass.
    Lots,
    /// Rooted at the checkpoint; used by cleared mass.
    Checkpoint,
    /// Rooted at the checkpoint approach; used by cleared mass while the
    /// checkpoint is not servicing.
    CheckpointClosed,
}

impl FieldLabel {
    /// All labels, in rebuild order.
    pub const ALL: [Self; 3] = [Self::Lots, Self::Checkpoint, Self::CheckpointClosed];

    /// Whether this field applies the lot-capacity penalty.
    pub const fn applies_lot_penalty(self) -> bool {
        matches!(self, Self::Lots)
    }

    /// Whether this field is used for leaving lots toward the checkpoint.
    pub const fn is_exit_field(self) -> bool {
        matches!(self, Self::Checkpoint | Self::CheckpointClosed)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Attribution bucket for delay truck-hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayCause {
    /// Slowdown and stalls on the road network.
    Congestion,
    /// Waiting for a lot to admit.
    LotWait,
    /// Waiting in the checkpoint queue.
    CheckpointQueue,
    /// Occupying a checkpoint service lane.
    CheckpointService,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_road_particles_move() {
        assert!(ParticleState::Road.is_moving());
        assert!(!ParticleState::Lot.is_moving());
        assert!(!ParticleState::Cleared.is_moving());
    }

    #[test]
    fn stall_reasons_map_to_delay_causes() {
        assert_eq!(StallReason::LotFull.delay_cause(), DelayCause::LotWait);
        assert_eq!(StallReason::NoAdmittingLot.delay_cause(), DelayCause::LotWait);
        assert_eq!(StallReason::RoadCapacity.delay_cause(), DelayCause::Congestion);
        assert_eq!(
            StallReason::CheckpointClosed.delay_cause(),
            DelayCause::CheckpointQueue
        );
    }

    #[test]
    fn only_lot_field_penalizes_lots() {
        assert!(FieldLabel::Lots.applies_lot_penalty());
        assert!(!FieldLabel::Checkpoint.applies_lot_penalty());
        assert!(FieldLabel::CheckpointClosed.is_exit_field());
    }

    #[test]
    fn regions_serialize_snake_case() {
        let json = serde_json::to_string(&Region::OffRoad).unwrap_or_default();
        assert_eq!(json, "\"off_road\"");
    }
}
