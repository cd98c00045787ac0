//! Frame sequencing, pacing and failure accounting.
//!
//! [`FrameScheduler::run_frame`] drives one acquire → record → draw →
//! present iteration through a [`FrameSequence`], records its render time,
//! then waits out the rest of the frame budget when an FPS cap is set.

use tracing::{debug, info, trace, warn};

use frametech_core::{FpsLimit, Timer};
use frametech_rhi::FrameError;

/// Number of render durations averaged for the FPS estimate.
pub const FPS_RECORDS: usize = 10;

/// Consecutive failed frames after which the loop gives up.
pub const MAX_CONSECUTIVE_FRAME_FAILURES: u32 = 5;

/// The four per-frame steps, implemented by the engine.
pub trait FrameSequence {
    /// Waits for the previous frame and returns the acquired image index.
    fn acquire_image(&mut self) -> Result<u32, FrameError>;

    /// Records the draw for `frame_index`.
    fn record(&mut self, frame_index: u32) -> Result<(), FrameError>;

    /// Submits the recorded commands.
    fn draw(&mut self) -> Result<(), FrameError>;

    fn present(&mut self, frame_index: u32) -> Result<(), FrameError>;

    /// Number of framebuffers the frame index cycles over.
    fn buffer_count(&self) -> u32;
}

/// Ring of the last [`FPS_RECORDS`] render durations in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    records: [u64; FPS_RECORDS],
    next: usize,
    filled: usize,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a duration, clamped to at least 1 ms.
    pub fn push(&mut self, millis: u64) {
        self.records[self.next] = millis.max(1);
        self.next = (self.next + 1) % FPS_RECORDS;
        self.filled = (self.filled + 1).min(FPS_RECORDS);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Mean of the stored durations, `None` before the first push.
    pub fn average_ms(&self) -> Option<f64> {
        if self.filled == 0 {
            return None;
        }
        let sum: u64 = self.records[..self.filled].iter().sum();
        Some(sum as f64 / self.filled as f64)
    }

    /// Frames per second implied by [`average_ms`](Self::average_ms).
    pub fn average_fps(&self) -> Option<f64> {
        self.average_ms().map(|ms| 1000.0 / ms)
    }
}

/// Owns the frame counter, frame index and pacing for the render loop.
#[derive(Debug)]
pub struct FrameScheduler {
    fps_limit: FpsLimit,
    counter: u64,
    frame_index: u32,
    stats: FrameStats,
    consecutive_failures: u32,
    total_failures: u64,
}

impl FrameScheduler {
    pub fn new(fps_limit: FpsLimit) -> Self {
        info!("Frame scheduler created, FPS limit: {}", fps_limit);
        Self {
            fps_limit,
            counter: 1,
            frame_index: 0,
            stats: FrameStats::new(),
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    /// Replaces the FPS cap for subsequent frames.
    pub fn set_fps_limit(&mut self, limit: FpsLimit) {
        match (self.fps_limit.is_limited(), limit.is_limited()) {
            (false, true) => info!("Setting FPS limit to {}", limit),
            (true, true) => info!("Replacing FPS limit {} with {}", self.fps_limit, limit),
            (true, false) => info!("Disabling FPS limit (was {})", self.fps_limit),
            (false, false) => debug!("FPS limit already disabled"),
        }
        self.fps_limit = limit;
    }

    /// Runs one frame and applies the failure policy.
    ///
    /// A failed frame is logged and counted; it leaves the counter and the
    /// frame index untouched. The pacing wait happens either way.
    ///
    /// # Errors
    ///
    /// Only errors that should end the loop: a fatal [`FrameError`] (device
    /// or surface lost), or [`FrameError::TooManyFailures`] once
    /// [`MAX_CONSECUTIVE_FRAME_FAILURES`] frames in a row have failed.
    pub fn run_frame<S: FrameSequence + ?Sized>(&mut self, sequence: &mut S) -> Result<(), FrameError> {
        let deadline = self.fps_limit.frame_budget().map(Timer::deadline_after);
        let timer = Timer::new();

        let result = self.render(sequence);

        self.stats.push(timer.elapsed_ms());
        if let Some(deadline) = deadline {
            Timer::block_until(deadline);
        }

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.advance(sequence.buffer_count());
                Ok(())
            }
            Err(e) => self.on_failure(e),
        }
    }

    fn render<S: FrameSequence + ?Sized>(&self, sequence: &mut S) -> Result<(), FrameError> {
        let image_index = sequence.acquire_image()?;
        sequence.record(image_index)?;
        sequence.draw()?;
        sequence.present(image_index)
    }

    fn advance(&mut self, buffer_count: u32) {
        self.frame_index = if buffer_count == 0 {
            0
        } else {
            // Lossless: the remainder is below a u32.
            (self.counter % u64::from(buffer_count)) as u32
        };
        trace!("Frame {} presented, next index {}", self.counter, self.frame_index);

        if self.counter % FPS_RECORDS as u64 == 0
            && let Some(fps) = self.stats.average_fps()
        {
            debug!("Average FPS over the last {} frames: {:.1}", self.stats.len(), fps);
        }

        self.counter += 1;
    }

    fn on_failure(&mut self, error: FrameError) -> Result<(), FrameError> {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        warn!(
            "Frame {} failed ({} in a row, {} total): {}",
            self.counter, self.consecutive_failures, self.total_failures, error
        );

        if error.is_fatal() {
            return Err(error);
        }
        if self.consecutive_failures >= MAX_CONSECUTIVE_FRAME_FAILURES {
            return Err(FrameError::TooManyFailures {
                count: self.consecutive_failures,
                last: error.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn fps_limit(&self) -> FpsLimit {
        self.fps_limit
    }

    /// Number of the next frame; starts at 1.
    #[inline]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[inline]
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::{Duration, Instant};

    use ash::vk;

    /// Scripted stand-in for the engine.
    #[derive(Default)]
    struct FakeSequence {
        buffer_count: u32,
        next_image: u32,
        render_delay: Duration,
        fail_draw_with: Option<vk::Result>,
        calls: Vec<&'static str>,
        recorded: Vec<u32>,
    }

    impl FakeSequence {
        fn new(buffer_count: u32) -> Self {
            Self {
                buffer_count,
                ..Self::default()
            }
        }
    }

    impl FrameSequence for FakeSequence {
        fn acquire_image(&mut self) -> Result<u32, FrameError> {
            self.calls.push("acquire");
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.buffer_count;
            Ok(image)
        }

        fn record(&mut self, frame_index: u32) -> Result<(), FrameError> {
            self.calls.push("record");
            self.recorded.push(frame_index);
            Ok(())
        }

        fn draw(&mut self) -> Result<(), FrameError> {
            self.calls.push("draw");
            thread::sleep(self.render_delay);
            match self.fail_draw_with {
                Some(result) => Err(FrameError::SubmitFailed(result)),
                None => Ok(()),
            }
        }

        fn present(&mut self, _frame_index: u32) -> Result<(), FrameError> {
            self.calls.push("present");
            Ok(())
        }

        fn buffer_count(&self) -> u32 {
            self.buffer_count
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        scheduler.run_frame(&mut fake).unwrap();
        assert_eq!(fake.calls, ["acquire", "record", "draw", "present"]);
    }

    #[test]
    fn test_frame_index_follows_counter() {
        for buffer_count in [1, 2, 3] {
            let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
            let mut fake = FakeSequence::new(buffer_count);
            assert_eq!(scheduler.counter(), 1);

            for presented in 1..=20u64 {
                scheduler.run_frame(&mut fake).unwrap();
                assert_eq!(
                    u64::from(scheduler.frame_index()),
                    presented % u64::from(buffer_count)
                );
                assert!(scheduler.frame_index() < buffer_count);
                assert_eq!(scheduler.counter(), presented + 1);
            }
        }
    }

    #[test]
    fn test_fps_cap_holds_the_frame_budget() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Fps60);
        let mut fake = FakeSequence::new(3);
        fake.render_delay = Duration::from_millis(5);

        let start = Instant::now();
        scheduler.run_frame(&mut fake).unwrap();

        assert!(start.elapsed() >= Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(scheduler.stats().len(), 1);
        assert!(scheduler.stats().average_ms().unwrap() >= 5.0);
    }

    #[test]
    fn test_unlimited_fills_the_stats_ring() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        for _ in 0..20 {
            scheduler.run_frame(&mut fake).unwrap();
        }
        assert_eq!(scheduler.stats().len(), FPS_RECORDS);
        assert!(scheduler.stats().average_ms().unwrap() >= 1.0);
    }

    #[test]
    fn test_failed_frame_does_not_advance() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        scheduler.run_frame(&mut fake).unwrap();
        let (counter, index) = (scheduler.counter(), scheduler.frame_index());

        fake.fail_draw_with = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        scheduler.run_frame(&mut fake).unwrap();

        assert_eq!(scheduler.counter(), counter);
        assert_eq!(scheduler.frame_index(), index);
        assert_eq!(scheduler.consecutive_failures(), 1);
        assert_eq!(scheduler.total_failures(), 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        fake.fail_draw_with = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        for _ in 0..MAX_CONSECUTIVE_FRAME_FAILURES - 1 {
            scheduler.run_frame(&mut fake).unwrap();
        }

        fake.fail_draw_with = None;
        scheduler.run_frame(&mut fake).unwrap();

        assert_eq!(scheduler.consecutive_failures(), 0);
        assert_eq!(
            scheduler.total_failures(),
            u64::from(MAX_CONSECUTIVE_FRAME_FAILURES - 1)
        );
    }

    #[test]
    fn test_repeated_failures_end_the_loop() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        fake.fail_draw_with = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        for _ in 0..MAX_CONSECUTIVE_FRAME_FAILURES - 1 {
            scheduler.run_frame(&mut fake).unwrap();
        }
        let err = scheduler.run_frame(&mut fake).unwrap_err();

        assert!(matches!(
            err,
            FrameError::TooManyFailures { count: MAX_CONSECUTIVE_FRAME_FAILURES, .. }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_device_lost_is_fatal_immediately() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        let mut fake = FakeSequence::new(3);
        fake.fail_draw_with = Some(vk::Result::ERROR_DEVICE_LOST);

        let err = scheduler.run_frame(&mut fake).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(scheduler.total_failures(), 1);
    }

    #[test]
    fn test_set_fps_limit() {
        let mut scheduler = FrameScheduler::new(FpsLimit::Unlimited);
        scheduler.set_fps_limit(FpsLimit::Fps30);
        assert_eq!(scheduler.fps_limit(), FpsLimit::Fps30);
        scheduler.set_fps_limit(FpsLimit::Fps120);
        assert_eq!(scheduler.fps_limit(), FpsLimit::Fps120);
        scheduler.set_fps_limit(FpsLimit::Unlimited);
        assert_eq!(scheduler.fps_limit(), FpsLimit::Unlimited);
    }

    #[test]
    fn test_frame_stats_ring() {
        let mut stats = FrameStats::new();
        assert_eq!(stats.average_ms(), None);

        stats.push(0);
        assert_eq!(stats.average_ms(), Some(1.0));

        for _ in 0..FPS_RECORDS {
            stats.push(20);
        }
        assert_eq!(stats.len(), FPS_RECORDS);
        assert_eq!(stats.average_ms(), Some(20.0));
        assert_eq!(stats.average_fps(), Some(50.0));
    }
}
