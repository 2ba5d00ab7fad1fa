//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Measures per-frame CPU time and keeps a running average.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    accumulated: Duration,
}

impl FrameTimer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            accumulated: Duration::ZERO,
        }
    }

    /// Marks the end of a frame and returns its duration.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.accumulated += delta;
        delta
    }

    /// Number of frames ticked so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Total time since the timer was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Average frame time in milliseconds, or zero before the first tick.
    pub fn average_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.accumulated.as_secs_f64() * 1000.0 / self.frames as f64
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_before_first_tick() {
        let timer = FrameTimer::new();
        assert_eq!(timer.frame_count(), 0);
        assert_eq!(timer.average_frame_ms(), 0.0);
    }

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = FrameTimer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.average_frame_ms() > 0.0);
    }
}
