//! Dwell and conversion queues.
//!
//! # Conversion
//!
//! Particles admitted into a lot get a [`DwellRecord`] in arrival order. In
//! deterministic mode the front record converts once its dwell reaches the
//! minimum. Records whose particle has already left the lot are dropped when
//! the scan reaches them, so removals elsewhere never corrupt the order.
//!
//! The stochastic variant splits each lot's held mass into a fast and a slow
//! population and samples how much of each converts this tick from a
//! binomial draw, seeded per `(seed, lot, tick)`. A fractional total is
//! dithered to whole units and taken from the oldest records of that lot.
//!
//! # Park release
//!
//! Particles injected into a park carry a [`ParkRecord`] with their own
//! required dwell (short or long tier) and are released to the road once it
//! has elapsed.

use std::collections::VecDeque;

use corridor_types::{LotId, ParticleId};

use crate::rng;

/// A particle held in a lot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DwellRecord {
    /// Lot holding the particle.
    pub lot: LotId,
    /// The held particle.
    pub particle: ParticleId,
    /// Simulated time of admission.
    pub arrival_s: f64,
}

/// Arrival-ordered conversion queue across all lots.
#[derive(Debug, Clone, Default)]
pub struct DwellQueue {
    records: VecDeque<DwellRecord>,
}

impl DwellQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    /// Append a record. Callers push in simulated-time order.
    pub fn push(&mut self, record: DwellRecord) {
        self.records.push_back(record);
    }

    /// Records currently queued, stale ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pop every eligible record from the front.
    ///
    /// `is_held(lot, particle)` reports whether the record still describes a
    /// particle held in that lot; stale records are discarded.
    pub fn drain_eligible(
        &mut self,
        now_s: f64,
        min_dwell_s: f64,
        mut is_held: impl FnMut(LotId, ParticleId) -> bool,
    ) -> Vec<DwellRecord> {
        let mut out = Vec::new();
        while let Some(front) = self.records.front().copied() {
            if !is_held(front.lot, front.particle) {
                self.records.pop_front();
                continue;
            }
            if now_s - front.arrival_s < min_dwell_s {
                break;
            }
            self.records.pop_front();
            out.push(front);
        }
        out
    }

    /// Remove and return up to `count` of the oldest valid records of `lot`.
    pub fn take_oldest(
        &mut self,
        lot: LotId,
        count: usize,
        mut is_held: impl FnMut(LotId, ParticleId) -> bool,
    ) -> Vec<DwellRecord> {
        let mut taken = Vec::new();
        self.records.retain(|record| {
            if !is_held(record.lot, record.particle) {
                return false;
            }
            if record.lot == lot && taken.len() < count {
                taken.push(*record);
                return false;
            }
            true
        });
        taken
    }
}

/// Parameters of the two-population conversion model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticConversion {
    /// Run seed.
    pub seed: u64,
    /// Fast-population characteristic dwell.
    pub fast_tau_s: f64,
    /// Slow-population characteristic dwell.
    pub slow_tau_s: f64,
    /// Share of held mass in the fast population.
    pub fast_share: f64,
}

impl StochasticConversion {
    /// Whole units of `held_units` that convert in `lot` during `tick`.
    pub fn sample(&self, lot: LotId, tick: u64, held_units: u64, dt_s: f64) -> u64 {
        if held_units == 0 {
            return 0;
        }
        let mut rng = rng::conversion_rng(self.seed, lot.get() as u64, tick);
        #[allow(clippy::cast_precision_loss)]
        let held = held_units as f64;
        let fast_mass = (held * self.fast_share).round();
        let slow_mass = held - fast_mass;
        let fast = rng::binomial(&mut rng, fast_mass, dt_s / self.fast_tau_s);
        let slow = rng::binomial(&mut rng, slow_mass, dt_s / self.slow_tau_s);
        let total = rng::dither(&mut rng, fast + slow).clamp(0.0, held);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let units = total as u64;
        units.min(held_units)
    }
}

/// A particle waiting in a park.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParkRecord {
    /// The held particle.
    pub particle: ParticleId,
    /// Simulated time of arrival.
    pub arrival_s: f64,
    /// Dwell this particle must complete before release.
    pub required_s: f64,
}

/// Park release queue. Records carry their own dwell, so eligibility is not
/// monotone in arrival order and the queue is scanned in full.
#[derive(Debug, Clone, Default)]
pub struct ParkQueue {
    records: Vec<ParkRecord>,
}

impl ParkQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Add a record.
    pub fn push(&mut self, record: ParkRecord) {
        self.records.push(record);
    }

    /// Records currently queued.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove and return every particle whose dwell has elapsed, in arrival
    /// order. Records for particles no longer parked are dropped.
    pub fn release_due(
        &mut self,
        now_s: f64,
        mut is_parked: impl FnMut(ParticleId) -> bool,
    ) -> Vec<ParticleId> {
        let mut released = Vec::new();
        self.records.retain(|record| {
            if !is_parked(record.particle) {
                return false;
            }
            if now_s - record.arrival_s >= record.required_s {
                released.push(record.particle);
                return false;
            }
            true
        });
        released
    }
}

/// Required park dwell for `particle`: the long tier for a deterministic
/// `long_share` subset, the short tier otherwise.
pub fn park_dwell(seed: u64, particle: ParticleId, short_s: f64, long_s: f64, long_share: f64) -> f64 {
    if rng::unit(seed ^ 0x5041_524b, particle.into_inner(), 0) < long_share {
        long_s
    } else {
        short_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lot: usize, particle: u64, arrival_s: f64) -> DwellRecord {
        DwellRecord {
            lot: LotId(lot),
            particle: ParticleId(particle),
            arrival_s,
        }
    }

    #[test]
    fn drains_only_eligible_front() {
        let mut queue = DwellQueue::new();
        queue.push(record(0, 1, 0.0));
        queue.push(record(0, 2, 50.0));
        queue.push(record(1, 3, 100.0));

        let out = queue.drain_eligible(120.0, 60.0, |_, _| true);
        let ids: Vec<u64> = out.iter().map(|r| r.particle.into_inner()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn stale_records_are_discarded_without_blocking() {
        let mut queue = DwellQueue::new();
        queue.push(record(0, 1, 0.0));
        queue.push(record(0, 2, 0.0));
        let out = queue.drain_eligible(100.0, 60.0, |_, p| p != ParticleId(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].particle, ParticleId(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn take_oldest_respects_lot_and_count() {
        let mut queue = DwellQueue::new();
        queue.push(record(0, 1, 0.0));
        queue.push(record(1, 2, 1.0));
        queue.push(record(0, 3, 2.0));
        queue.push(record(0, 4, 3.0));
        let taken = queue.take_oldest(LotId(0), 2, |_, _| true);
        let ids: Vec<u64> = taken.iter().map(|r| r.particle.into_inner()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn stochastic_sample_is_reproducible_and_bounded() {
        let model = StochasticConversion {
            seed: 5,
            fast_tau_s: 600.0,
            slow_tau_s: 6000.0,
            fast_share: 0.5,
        };
        for tick in 0..200 {
            let a = model.sample(LotId(2), tick, 40, 60.0);
            let b = model.sample(LotId(2), tick, 40, 60.0);
            assert_eq!(a, b);
            assert!(a <= 40);
        }
        assert_eq!(model.sample(LotId(0), 1, 0, 60.0), 0);
    }

    #[test]
    fn stochastic_rate_tracks_tau() {
        let model = StochasticConversion {
            seed: 1,
            fast_tau_s: 1000.0,
            slow_tau_s: 1000.0,
            fast_share: 0.5,
        };
        // Expected 100 * 100 / 1000 = 10 units per draw.
        let total: u64 = (0..400).map(|t| model.sample(LotId(0), t, 100, 100.0)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = total as f64 / 400.0;
        assert!((mean - 10.0).abs() < 1.0, "mean {mean}");
    }

    #[test]
    fn small_expectations_still_convert() {
        let model = StochasticConversion {
            seed: 3,
            fast_tau_s: 1200.0,
            slow_tau_s: 1200.0,
            fast_share: 0.7,
        };
        // 8 * 5 / 1200 is a thirtieth of a unit per draw; 2000 draws expect
        // about 67 units.
        let total: u64 = (0..2000).map(|t| model.sample(LotId(0), t, 8, 5.0)).sum();
        assert!((40..=95).contains(&total), "total {total}");
    }

    #[test]
    fn park_release_honors_each_dwell() {
        let mut queue = ParkQueue::new();
        queue.push(ParkRecord {
            particle: ParticleId(1),
            arrival_s: 0.0,
            required_s: 100.0,
        });
        queue.push(ParkRecord {
            particle: ParticleId(2),
            arrival_s: 0.0,
            required_s: 10.0,
        });
        assert_eq!(queue.release_due(50.0, |_| true), vec![ParticleId(2)]);
        assert!(queue.release_due(99.0, |_| true).is_empty());
        assert_eq!(queue.release_due(100.0, |_| true), vec![ParticleId(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn park_tiers_follow_share() {
        let long = (0..1000)
            .filter(|&i| park_dwell(3, ParticleId(i), 10.0, 99.0, 0.25) > 50.0)
            .count();
        assert!((200..300).contains(&long), "long tier count {long}");
        assert!(park_dwell(3, ParticleId(1), 10.0, 99.0, 0.0) < 50.0);
    }
}
