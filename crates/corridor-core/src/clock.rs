//! Simulated clock.
//!
//! The tick counter is the single source of truth. Simulated time and the
//! hour of day are derived from it on demand, so no floating-point time
//! accumulator drifts over a multi-day run.

/// Seconds in one simulated hour.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// The tick length is not a positive finite number.
    #[error("invalid tick length: {dt_s}")]
    InvalidTickLength {
        /// The rejected tick length in seconds.
        dt_s: f64,
    },
}

/// Simulation clock with a fixed tick length.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    /// Completed ticks.
    tick: u64,
    /// Tick length in seconds.
    dt_s: f64,
}

impl SimClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTickLength`] if `dt_s` is not positive.
    pub fn new(dt_s: f64) -> Result<Self, ClockError> {
        if !dt_s.is_finite() || dt_s <= 0.0 {
            return Err(ClockError::InvalidTickLength { dt_s });
        }
        Ok(Self { tick: 0, dt_s })
    }

    /// Completed ticks.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Tick length in seconds.
    pub const fn dt_s(&self) -> f64 {
        self.dt_s
    }

    /// Simulated seconds elapsed after `tick` completed ticks.
    #[allow(clippy::cast_precision_loss)]
    pub fn time_at(&self, tick: u64) -> f64 {
        tick as f64 * self.dt_s
    }

    /// Simulated seconds elapsed so far.
    pub fn now_s(&self) -> f64 {
        self.time_at(self.tick)
    }

    /// Hour of day (0..24) at simulated time `time_s`.
    pub fn hour_of_day(time_s: f64) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let hours = (time_s.max(0.0) / SECONDS_PER_HOUR).floor() as u64;
        // `hours % 24` always fits.
        usize::try_from(hours % 24).unwrap_or(0)
    }

    /// Advance by one tick and return the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] at `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_tick_length() {
        assert!(SimClock::new(0.0).is_err());
        assert!(SimClock::new(-1.0).is_err());
        assert!(SimClock::new(f64::INFINITY).is_err());
    }

    #[test]
    fn time_is_derived_from_tick() {
        let mut clock = SimClock::new(0.1).unwrap();
        for _ in 0..36_000 {
            clock.advance().unwrap();
        }
        assert_eq!(clock.tick(), 36_000);
        assert!((clock.now_s() - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn hour_of_day_wraps() {
        assert_eq!(SimClock::hour_of_day(0.0), 0);
        assert_eq!(SimClock::hour_of_day(3599.9), 0);
        assert_eq!(SimClock::hour_of_day(3600.0), 1);
        assert_eq!(SimClock::hour_of_day(25.0 * 3600.0), 1);
    }
}
