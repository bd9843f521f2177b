//! Rendering of a finished comparison.
//!
//! The JSON form wraps the [`ComparisonReport`] in a [`RunEnvelope`] that
//! carries a run id and wall-clock stamps. Those stamps never feed back into
//! the simulation, which stays a pure function of its inputs.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use corridor_core::runner::ComparisonReport;
use serde::Serialize;
use uuid::Uuid;

/// A comparison report stamped with run identity.
#[derive(Debug, Clone, Serialize)]
pub struct RunEnvelope {
    /// Time-ordered id of this invocation.
    pub run_id: Uuid,
    /// Wall-clock start of the comparison.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the comparison.
    pub finished_at: DateTime<Utc>,
    /// Per-scenario results and baseline diffs.
    pub report: ComparisonReport,
}

impl RunEnvelope {
    /// Stamp `report` with a fresh run id.
    pub fn new(started_at: DateTime<Utc>, report: ComparisonReport) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at,
            finished_at: Utc::now(),
            report,
        }
    }
}

/// Plain-text summary: one block per scenario, then the baseline diffs.
pub fn render_summary(envelope: &RunEnvelope) -> String {
    let mut out = String::new();
    let report = &envelope.report;
    let _ = writeln!(out, "run {} (baseline: {})", envelope.run_id, report.baseline);

    for run in &report.reports {
        let m = &run.final_metrics;
        let _ = writeln!(out, "\n[{}] {} ticks, {:.0} s simulated", run.scenario, run.ticks, m.sim_time_s);
        let _ = writeln!(
            out,
            "  mass: injected {:.1}, exited {:.1}, active {:.1}",
            m.injected_mass, m.exited_mass, m.active_mass
        );
        let _ = writeln!(
            out,
            "  delay h: congestion {:.2}, lot wait {:.2}, queue {:.2}, service {:.2} (total {:.2})",
            m.delay_hours.congestion,
            m.delay_hours.lot_wait,
            m.delay_hours.checkpoint_queue,
            m.delay_hours.checkpoint_service,
            m.delay_hours.total()
        );
        let _ = writeln!(
            out,
            "  completions {}, conversions {}, lot-full stalled {}, rebuilds {}",
            m.completions, m.conversions, m.lot_full_stalled, m.router_rebuilds
        );
        for lot in &m.lots {
            let _ = writeln!(
                out,
                "  lot {}: {:.0}% full, {:?}",
                lot.name,
                lot.fill_ratio * 100.0,
                lot.state
            );
        }
    }

    if !report.diffs.is_empty() {
        let _ = writeln!(out, "\nversus {}:", report.baseline);
    }
    for diff in &report.diffs {
        let _ = writeln!(
            out,
            "  {}: delay {:+.2} h, exited {:+.1}, completions {:+}, lot-full stalled {:+}",
            diff.scenario,
            diff.total_delay_hours,
            diff.exited_mass,
            diff.completions,
            diff.lot_full_stalled
        );
    }
    out
}
