//! Millisecond timer used for frame measurement and pacing.

use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep while waiting on a deadline.
const SLEEP_SLICE: Duration = Duration::from_millis(1);

/// Monotonic timer for measuring render time and waiting on frame deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed whole milliseconds since the timer was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the instant `budget` from now.
    pub fn deadline_after(budget: Duration) -> Instant {
        Instant::now() + budget
    }

    /// Blocks the calling thread until `deadline` has passed.
    ///
    /// Sleeps in short slices and re-checks the clock, so it never returns
    /// before the deadline and overshoots by at most one slice plus scheduler
    /// latency.
    pub fn block_until(deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_until_never_returns_early() {
        let budget = Duration::from_millis(12);
        let start = Instant::now();
        let deadline = Timer::deadline_after(budget);

        Timer::block_until(deadline);

        assert!(Instant::now() >= deadline);
        assert!(start.elapsed() >= budget);
    }

    #[test]
    fn test_block_until_past_deadline_returns_immediately() {
        let deadline = Instant::now();
        thread::sleep(Duration::from_millis(2));

        let start = Instant::now();
        Timer::block_until(deadline);

        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_elapsed_ms_counts_whole_milliseconds() {
        let timer = Timer::new();
        thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        assert!(timer.elapsed() >= Duration::from_millis(5));
    }
}
