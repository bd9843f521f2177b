//! Congestion response, speed jitter and the intersection heuristic.
//!
//! All functions here are pure. Randomness comes from [`crate::rng`] keyed by
//! particle id and sub-step, or by cell.

use crate::rng;

/// Speed multiplier for perceived density `rho`.
///
/// `1 / (1 + (rho / rho_c)^2)`: exactly 1 at zero density, one half at the
/// critical density, and never zero.
pub fn response(rho: f64, critical_density: f64) -> f64 {
    let r = rho.max(0.0) / critical_density;
    1.0 / r.mul_add(r, 1.0)
}

/// Perceived density of the downstream cell.
///
/// Actual mass over capacity plus exogenous friction, minus the mass that is
/// about to leave that cell toward the particle. Never negative.
pub fn effective_density(downstream_mass: f64, capacity: f64, friction: f64, oncoming: f64) -> f64 {
    if capacity <= 0.0 {
        return friction.max(0.0);
    }
    ((downstream_mass - oncoming) / capacity + friction).max(0.0)
}

/// Per-particle speed factor in `[1 - amplitude, 1 + amplitude)`.
pub fn jitter(seed: u64, particle: u64, substep: u64, amplitude: f64) -> f64 {
    let u = rng::unit(seed, particle, substep);
    amplitude.mul_add(2.0f64.mul_add(u, -1.0), 1.0)
}

/// Signal phase offset of a cell, in `[0, cycle_s)`.
pub fn phase(seed: u64, cell: usize, cycle_s: f64) -> f64 {
    rng::unit(seed ^ 0x5157_4e41_4c00_0000, cell as u64, 0) * cycle_s
}

/// Whether the signal at `cell` is red at simulated time `time_s`.
pub fn is_red(seed: u64, cell: usize, time_s: f64, cycle_s: f64, red_s: f64) -> bool {
    if red_s <= 0.0 || cycle_s <= 0.0 {
        return false;
    }
    (time_s + phase(seed, cell, cycle_s)).rem_euclid(cycle_s) < red_s
}
