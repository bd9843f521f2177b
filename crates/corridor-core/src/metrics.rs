//! Run metrics: cumulative counters, per-tick snapshots and scenario diffs.

use corridor_ledger::MassLedger;
use corridor_types::{DelayBreakdown, MetricsSnapshot};
use serde::{Deserialize, Serialize};

use crate::lots::LotRegistry;
use crate::particles::ParticleArena;
use crate::service::ServiceLanes;

/// Counters accumulated over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsAccumulator {
    /// Delay truck-hours by cause.
    pub delay: DelayBreakdown,
    /// Units that finished checkpoint service.
    pub completions: u64,
    /// Held units converted to cleared.
    pub conversions: u64,
    /// Distinct units ever blocked by a full lot.
    pub lot_full_stalled: u64,
    /// Units admitted into lots.
    pub admissions: u64,
    /// Units released from parks.
    pub park_releases: u64,
}

/// Inputs for one snapshot that do not live in the accumulator.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotContext<'a> {
    /// Tick that just completed.
    pub tick: u64,
    /// Simulated time at the end of that tick.
    pub sim_time_s: f64,
    /// Live particles.
    pub arena: &'a ParticleArena,
    /// Lot states.
    pub lots: &'a LotRegistry,
    /// Checkpoint lanes and queue.
    pub service: &'a ServiceLanes,
    /// Mass ledger.
    pub ledger: &'a MassLedger,
    /// Router fields installed so far.
    pub router_rebuilds: u64,
    /// Sub-steps used this tick.
    pub substeps: u32,
}

impl MetricsAccumulator {
    /// Build the snapshot for the tick described by `ctx`.
    pub fn snapshot(&self, ctx: &SnapshotContext<'_>) -> MetricsSnapshot {
        let stalled_now = ctx.arena.iter().filter(|p| p.stall.is_some()).count();
        MetricsSnapshot {
            tick: ctx.tick,
            sim_time_s: ctx.sim_time_s,
            injected_mass: ctx.ledger.injected(),
            exited_mass: ctx.ledger.exited(),
            active_particles: ctx.arena.len() as u64,
            active_mass: ctx.arena.total_mass(),
            delay_hours: self.delay,
            lots: ctx.lots.snapshots(),
            lane_utilization: ctx.service.utilization(),
            checkpoint_queue_len: ctx.service.queue_len() as u64,
            completions: self.completions,
            conversions: self.conversions,
            lot_full_stalled: self.lot_full_stalled,
            stalled_now: stalled_now as u64,
            router_rebuilds: ctx.router_rebuilds,
            substeps: ctx.substeps,
        }
    }
}

/// Final-metrics difference of one scenario against the baseline
/// (`scenario - baseline`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDiff {
    /// Compared scenario.
    pub scenario: String,
    /// Baseline scenario.
    pub baseline: String,
    /// Delay difference by cause.
    pub delay_hours: DelayBreakdown,
    /// Total delay difference.
    pub total_delay_hours: f64,
    /// Exited mass difference.
    pub exited_mass: f64,
    /// Active mass difference.
    pub active_mass: f64,
    /// Completion count difference.
    pub completions: i64,
    /// Difference in units ever blocked by a full lot.
    pub lot_full_stalled: i64,
}

impl MetricsDiff {
    /// Compare `scenario`'s final metrics against `baseline`'s.
    pub fn between(
        baseline_name: &str,
        baseline: &MetricsSnapshot,
        scenario_name: &str,
        scenario: &MetricsSnapshot,
    ) -> Self {
        let (b, s) = (&baseline.delay_hours, &scenario.delay_hours);
        Self {
            scenario: scenario_name.to_owned(),
            baseline: baseline_name.to_owned(),
            delay_hours: DelayBreakdown {
                congestion: s.congestion - b.congestion,
                lot_wait: s.lot_wait - b.lot_wait,
                checkpoint_queue: s.checkpoint_queue - b.checkpoint_queue,
                checkpoint_service: s.checkpoint_service - b.checkpoint_service,
            },
            total_delay_hours: s.total() - b.total(),
            exited_mass: scenario.exited_mass - baseline.exited_mass,
            active_mass: scenario.active_mass - baseline.active_mass,
            completions: signed_delta(scenario.completions, baseline.completions),
            lot_full_stalled: signed_delta(scenario.lot_full_stalled, baseline.lot_full_stalled),
        }
    }
}

fn signed_delta(a: u64, b: u64) -> i64 {
    let a = i64::try_from(a).unwrap_or(i64::MAX);
    let b = i64::try_from(b).unwrap_or(i64::MAX);
    a.saturating_sub(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(completions: u64, congestion: f64, exited: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            tick: 10,
            sim_time_s: 100.0,
            injected_mass: 50.0,
            exited_mass: exited,
            active_particles: 3,
            active_mass: 50.0 - exited,
            delay_hours: DelayBreakdown {
                congestion,
                ..DelayBreakdown::default()
            },
            lots: Vec::new(),
            lane_utilization: 0.5,
            checkpoint_queue_len: 0,
            completions,
            conversions: 0,
            lot_full_stalled: 2,
            stalled_now: 0,
            router_rebuilds: 1,
            substeps: 1,
        }
    }

    #[test]
    fn diff_is_scenario_minus_baseline() {
        let base = snapshot(10, 4.0, 10.0);
        let other = snapshot(7, 6.5, 7.0);
        let diff = MetricsDiff::between("base", &base, "tight", &other);
        assert_eq!(diff.completions, -3);
        assert_eq!(diff.lot_full_stalled, 0);
        assert!((diff.delay_hours.congestion - 2.5).abs() < 1e-12);
        assert!((diff.total_delay_hours - 2.5).abs() < 1e-12);
        assert!((diff.exited_mass + 3.0).abs() < 1e-12);
        assert_eq!(diff.scenario, "tight");
    }

    #[test]
    fn empty_run_snapshot() {
        let arena = ParticleArena::new(4);
        let lots = LotRegistry::new(Vec::new(), 0.9, 0.0);
        let service = ServiceLanes::new(2);
        let ledger = MassLedger::new();
        let acc = MetricsAccumulator::default();
        let snap = acc.snapshot(&SnapshotContext {
            tick: 1,
            sim_time_s: 5.0,
            arena: &arena,
            lots: &lots,
            service: &service,
            ledger: &ledger,
            router_rebuilds: 0,
            substeps: 1,
        });
        assert_eq!(snap.active_particles, 0);
        assert!(snap.active_mass.abs() < f64::EPSILON);
        assert!(snap.lane_utilization.abs() < f64::EPSILON);
    }
}
