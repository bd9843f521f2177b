//! Conservation law verification.
//!
//! For a sample point T the check is:
//!
//! ```text
//! |injected(T) - exited(T) - active(T)| <= tolerance * max(1, injected(T))
//! ```
//!
//! The tolerance is relative so long runs with many thousands of units do not
//! trip on floating-point accumulation. Negative or non-finite quantities are
//! always anomalies.

use crate::MassAnomaly;

/// Relative tolerance used by [`crate::MassLedger::verify_conservation`].
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// The result of a conservation check at one sample point.
#[derive(Debug, Clone, PartialEq)]
pub enum ConservationResult {
    /// Mass balances.
    Balanced,
    /// Mass is missing or was created from nothing.
    Anomaly(MassAnomaly),
}

impl ConservationResult {
    /// Whether the check passed.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

/// Verify that injected minus exited mass equals the mass on the grid.
pub fn verify_conservation(
    tick: u64,
    injected: f64,
    exited: f64,
    active: f64,
    tolerance: f64,
) -> ConservationResult {
    let quantities = [injected, exited, active];
    if quantities.iter().any(|q| !q.is_finite() || *q < 0.0) {
        return anomaly(
            tick,
            injected,
            exited,
            active,
            format!(
                "MASS_ANOMALY at tick {tick}: invalid totals injected={injected} \
                 exited={exited} active={active}"
            ),
        );
    }

    let discrepancy = injected - exited - active;
    let bound = tolerance * injected.max(1.0);
    if discrepancy.abs() <= bound {
        return ConservationResult::Balanced;
    }

    anomaly(
        tick,
        injected,
        exited,
        active,
        format!(
            "MASS_ANOMALY at tick {tick}: injected {injected} - exited {exited} != \
             active {active} (off by {discrepancy})"
        ),
    )
}

fn anomaly(tick: u64, injected: f64, exited: f64, active: f64, message: String) -> ConservationResult {
    ConservationResult::Anomaly(MassAnomaly {
        tick,
        injected,
        exited,
        active,
        discrepancy: injected - exited - active,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_when_totals_match() {
        assert!(verify_conservation(4, 10.0, 3.0, 7.0, DEFAULT_TOLERANCE).is_balanced());
    }

    #[test]
    fn tiny_float_drift_is_tolerated() {
        let active = 0.1 + 0.2;
        assert!(verify_conservation(1, 0.3, 0.0, active, DEFAULT_TOLERANCE).is_balanced());
    }

    #[test]
    fn created_mass_is_an_anomaly() {
        let result = verify_conservation(9, 5.0, 0.0, 6.0, DEFAULT_TOLERANCE);
        assert!(!result.is_balanced());
        if let ConservationResult::Anomaly(anomaly) = result {
            assert_eq!(anomaly.tick, 9);
            assert!((anomaly.discrepancy + 1.0).abs() < f64::EPSILON);
            assert!(anomaly.message.contains("tick 9"));
        }
    }

    #[test]
    fn negative_totals_are_anomalies() {
        assert!(!verify_conservation(1, 1.0, 2.0, -1.0, DEFAULT_TOLERANCE).is_balanced());
        assert!(!verify_conservation(1, f64::NAN, 0.0, 0.0, DEFAULT_TOLERANCE).is_balanced());
    }
}
