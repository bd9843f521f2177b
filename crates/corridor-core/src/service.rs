//! Checkpoint service lanes.
//!
//! A fixed bank of parallel lanes fed from one FIFO queue. This is the only
//! place mass leaves the simulation.
//!
//! A tick covers the interval `(tick_start, tick_end]`. Each lane completes
//! every occupant whose service ends inside the interval, in a loop, and
//! refills immediately from the queue. A refill starts at the moment the lane
//! actually became free, not at the tick boundary, so a tick longer than the
//! service time yields several completions per lane with no lost throughput.

use std::collections::VecDeque;

use corridor_types::ParticleId;

/// One service channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Lane {
    /// Unit being served.
    pub occupant: Option<ParticleId>,
    /// When the current service ends.
    pub busy_until: f64,
    /// When the lane last became free.
    pub free_since: f64,
}

/// What happened in the lanes during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStep {
    /// Units that finished service, in completion-processing order.
    pub completed: Vec<ParticleId>,
    /// Units that entered a lane.
    pub started: Vec<ParticleId>,
}

/// The checkpoint: lanes plus queue.
#[derive(Debug, Clone, Default)]
pub struct ServiceLanes {
    lanes: Vec<Lane>,
    queue: VecDeque<ParticleId>,
}

impl ServiceLanes {
    /// Create `count` idle lanes, free since time zero.
    pub fn new(count: usize) -> Self {
        Self {
            lanes: vec![Lane::default(); count],
            queue: VecDeque::new(),
        }
    }

    /// Add a unit to the back of the queue.
    pub fn enqueue(&mut self, particle: ParticleId) {
        self.queue.push_back(particle);
    }

    /// Units waiting for a lane.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The lanes.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Busy lanes over total lanes.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.lanes.is_empty() {
            return 0.0;
        }
        let busy = self.lanes.iter().filter(|l| l.occupant.is_some()).count();
        busy as f64 / self.lanes.len() as f64
    }

    /// Advance every lane through `(tick_start, tick_end]`.
    ///
    /// `service_time` is `None` while the checkpoint is closed: occupants
    /// already in a lane still finish, but nothing new starts. `is_waiting`
    /// filters out queued ids that are no longer valid.
    pub fn step(
        &mut self,
        tick_start: f64,
        tick_end: f64,
        service_time: Option<f64>,
        mut is_waiting: impl FnMut(ParticleId) -> bool,
    ) -> ServiceStep {
        let mut step = ServiceStep::default();
        let service_time = service_time.filter(|s| *s > 0.0);

        for lane in &mut self.lanes {
            loop {
                if let Some(occupant) = lane.occupant {
                    if lane.busy_until > tick_end {
                        break;
                    }
                    step.completed.push(occupant);
                    lane.occupant = None;
                    lane.free_since = lane.busy_until;
                    continue;
                }

                let Some(service) = service_time else {
                    break;
                };
                let Some(next) = pop_waiting(&mut self.queue, &mut is_waiting) else {
                    break;
                };
                let start = lane.free_since.max(tick_start);
                lane.occupant = Some(next);
                lane.busy_until = start + service;
                step.started.push(next);
            }
        }
        step
    }
}

fn pop_waiting(
    queue: &mut VecDeque<ParticleId>,
    is_waiting: &mut impl FnMut(ParticleId) -> bool,
) -> Option<ParticleId> {
    while let Some(id) = queue.pop_front() {
        if is_waiting(id) {
            return Some(id);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(lanes: usize, queued: u64) -> ServiceLanes {
        let mut service = ServiceLanes::new(lanes);
        for i in 0..queued {
            service.enqueue(ParticleId(i));
        }
        service
    }

    #[test]
    fn two_completions_per_lane_when_tick_is_twice_service() {
        let mut service = loaded(3, 20);
        let step = service.step(0.0, 120.0, Some(60.0), |_| true);
        assert_eq!(step.completed.len(), 6);
        // Each lane holds a third unit that finishes at 180.
        assert_eq!(step.started.len(), 9);
        assert!(service.lanes().iter().all(|l| (l.busy_until - 180.0).abs() < 1e-9));
        assert_eq!(service.queue_len(), 11);
    }

    #[test]
    fn refill_uses_actual_free_time() {
        let mut service = loaded(1, 5);
        // Tick 1: start at 0, finish at 40.
        let first = service.step(0.0, 30.0, Some(40.0), |_| true);
        assert!(first.completed.is_empty());
        // Tick 2 covers (30, 60]: completes at 40, refill finishes at 80.
        let second = service.step(30.0, 60.0, Some(40.0), |_| true);
        assert_eq!(second.completed, vec![ParticleId(0)]);
        assert!((service.lanes()[0].busy_until - 80.0).abs() < 1e-9);
    }

    #[test]
    fn idle_lane_starts_at_tick_start() {
        let mut service = ServiceLanes::new(1);
        let _ = service.step(0.0, 100.0, Some(10.0), |_| true);
        service.enqueue(ParticleId(1));
        let step = service.step(100.0, 105.0, Some(10.0), |_| true);
        assert_eq!(step.started, vec![ParticleId(1)]);
        assert!((service.lanes()[0].busy_until - 110.0).abs() < 1e-9);
    }

    #[test]
    fn completion_at_tick_end_is_inclusive() {
        let mut service = loaded(1, 1);
        let step = service.step(0.0, 10.0, Some(10.0), |_| true);
        assert_eq!(step.completed, vec![ParticleId(0)]);
    }

    #[test]
    fn closed_checkpoint_finishes_but_does_not_refill() {
        let mut service = loaded(1, 3);
        let _ = service.step(0.0, 5.0, Some(10.0), |_| true);
        let step = service.step(5.0, 50.0, None, |_| true);
        assert_eq!(step.completed, vec![ParticleId(0)]);
        assert!(step.started.is_empty());
        assert_eq!(service.queue_len(), 2);
        assert!(service.utilization().abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_queue_entries_are_skipped() {
        let mut service = loaded(1, 3);
        let step = service.step(0.0, 1.0, Some(10.0), |id| id != ParticleId(0));
        assert_eq!(step.started, vec![ParticleId(1)]);
        assert!((service.utilization() - 1.0).abs() < f64::EPSILON);
    }
}
