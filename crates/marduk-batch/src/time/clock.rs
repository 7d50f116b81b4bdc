use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time source driving animation timing.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Reads `Instant::now()`.
#[derive(Debug, Default, Copy, Clone)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// The baseline is captured at construction; `advance` steps it forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Moves the clock forward by `dt` and returns the new time.
    pub fn advance(&self, dt: Duration) -> Instant {
        let next = self.now.get() + dt;
        self.now.set(next);
        next
    }

    /// Moves the clock forward by `seconds` (fractional).
    pub fn advance_secs(&self, seconds: f32) -> Instant {
        self.advance(Duration::from_secs_f32(seconds.max(0.0)))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_on_advance() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        let t1 = clock.advance(Duration::from_millis(16));
        assert_eq!(t1 - t0, Duration::from_millis(16));
        assert_eq!(clock.now(), t1);
    }

    #[test]
    fn negative_seconds_do_not_rewind() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.advance_secs(-1.0);
        assert_eq!(clock.now(), t0);
    }
}
