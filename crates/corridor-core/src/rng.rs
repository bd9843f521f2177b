//! Deterministic randomness.
//!
//! Nothing in the simulation reads wall-clock time or OS entropy. Cheap
//! per-entity draws (speed jitter, park tiers, cleared arrivals, signal
//! phases) hash the run seed together with entity ids through a `xorshift64`
//! mixer. Conversion sampling, which needs proper normal variates, seeds a
//! `ChaCha8Rng` from `(seed, lot, tick)` so every draw is reproducible no
//! matter how many other draws happened before it.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Mix `seed` with two entity keys into a well-spread 64-bit value.
pub const fn mix(seed: u64, a: u64, b: u64) -> u64 {
    let mut state = seed
        .wrapping_add(a.wrapping_mul(0x517c_c1b7_2722_0a95))
        .wrapping_add(b.wrapping_mul(0x9e37_79b9_7f4a_7c15));
    if state == 0 {
        state = 0xdead_beef_cafe_babe;
    }
    // Two xorshift64 rounds with a multiply in between.
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state = state.wrapping_mul(0x2545_f491_4f6c_dd1d);
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

/// Uniform value in `[0, 1)` derived from `(seed, a, b)`.
#[allow(clippy::cast_precision_loss)]
pub fn unit(seed: u64, a: u64, b: u64) -> f64 {
    // Top 53 bits map exactly onto the f64 mantissa.
    (mix(seed, a, b) >> 11) as f64 / (1_u64 << 53) as f64
}

/// A `ChaCha8Rng` seeded from `(seed, lot, tick)`.
pub fn conversion_rng(seed: u64, lot: u64, tick: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(mix(seed, lot, tick))
}

/// Standard normal variate via Box-Muller.
pub fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    // `1 - u` keeps the log argument in (0, 1].
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Variance below which [`binomial`] counts trials one by one.
const EXACT_VARIANCE: f64 = 9.0;

/// Binomial draw of `mass` whole trials with success probability `p`.
///
/// Small draws count Bernoulli trials exactly; larger ones use the normal
/// approximation `N(m·p, m·p·(1−p))` clamped to `[0, mass]`. The result may
/// be fractional in the normal regime.
pub fn binomial(rng: &mut ChaCha8Rng, mass: f64, p: f64) -> f64 {
    if mass <= 0.0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let mean = mass * p;
    let variance = mean * (1.0 - p);
    if variance < EXACT_VARIANCE {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let trials = mass.round() as u64;
        let hits = (0..trials).filter(|_| rng.random::<f64>() < p).count();
        #[allow(clippy::cast_precision_loss)]
        let hits = hits as f64;
        return hits;
    }
    let draw = standard_normal(rng).mul_add(variance.sqrt(), mean);
    draw.clamp(0.0, mass)
}

/// Round `value` down, or up with probability equal to its fractional part.
pub fn dither(rng: &mut ChaCha8Rng, value: f64) -> f64 {
    let u: f64 = rng.random::<f64>();
    (value + u).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_is_deterministic_and_key_sensitive() {
        assert_eq!(mix(42, 1, 2), mix(42, 1, 2));
        assert_ne!(mix(42, 1, 2), mix(43, 1, 2));
        assert_ne!(mix(42, 1, 2), mix(42, 2, 1));
    }

    #[test]
    fn unit_stays_in_range() {
        for i in 0..1000 {
            let u = unit(7, i, i * 3);
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn conversion_rng_replays() {
        let mut a = conversion_rng(1, 2, 3);
        let mut b = conversion_rng(1, 2, 3);
        for _ in 0..10 {
            assert_eq!(
                binomial(&mut a, 50.0, 0.1).to_bits(),
                binomial(&mut b, 50.0, 0.1).to_bits()
            );
        }
    }

    #[test]
    fn binomial_draw_is_clamped() {
        let mut rng = conversion_rng(9, 0, 0);
        for _ in 0..500 {
            let draw = binomial(&mut rng, 3.0, 0.5);
            assert!((0.0..=3.0).contains(&draw));
        }
        assert!(binomial(&mut rng, 0.0, 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn small_binomial_counts_whole_trials() {
        let mut rng = conversion_rng(5, 1, 1);
        let n = 4000;
        let total: f64 = (0..n).map(|_| binomial(&mut rng, 8.0, 0.02)).sum();
        // Expected 0.16 per draw.
        let mean = total / f64::from(n);
        assert!((mean - 0.16).abs() < 0.04, "mean {mean}");
        let draw = binomial(&mut rng, 8.0, 0.02);
        assert!((draw - draw.round()).abs() < f64::EPSILON);
    }

    #[test]
    fn binomial_mean_is_close() {
        let mut rng = conversion_rng(11, 4, 5);
        let n = 4000;
        let total: f64 = (0..n).map(|_| binomial(&mut rng, 100.0, 0.2)).sum();
        let mean = total / f64::from(n);
        assert!((mean - 20.0).abs() < 0.5, "mean {mean}");
    }
}
