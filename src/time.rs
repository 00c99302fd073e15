//! Frame clock driving the flock's `tick`.
//!
//! ```ignore
//! let mut clock = FrameClock::fixed(1.0 / 60.0);
//! loop {
//!     let dt = clock.tick();
//!     flock.tick(dt, None)?;
//! }
//! ```

use std::time::{Duration, Instant};

/// Longest step handed to the simulation after a stall.
pub const MAX_FRAME_DELTA: f32 = 0.1;

/// Produces one delta time per frame.
///
/// A fixed clock returns the same step every frame, which keeps headless
/// runs deterministic. A real-time clock measures wall time between ticks,
/// clamped to [`MAX_FRAME_DELTA`].
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    fixed_delta: Option<f32>,
    delta_secs: f32,
    simulated_secs: f64,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
}

impl FrameClock {
    /// Wall-clock timing.
    pub fn realtime() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            fixed_delta: None,
            delta_secs: 0.0,
            simulated_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: Duration::from_millis(500),
        }
    }

    /// Constant `delta` seconds per frame. Negative values clamp to 0.
    pub fn fixed(delta: f32) -> Self {
        Self {
            fixed_delta: Some(delta.max(0.0)),
            ..Self::realtime()
        }
    }

    /// Advance one frame and return its delta time in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let measured = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.delta_secs = self
            .fixed_delta
            .unwrap_or_else(|| measured.min(MAX_FRAME_DELTA));
        self.simulated_secs += self.delta_secs as f64;
        self.frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        self.delta_secs
    }

    /// Delta time of the last frame.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    /// Sum of all deltas handed out.
    #[inline]
    pub fn simulated(&self) -> f64 {
        self.simulated_secs
    }

    /// Frames ticked so far.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    /// Measured frames per second, refreshed twice a second.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Wall time since the clock was created.
    pub fn wall_elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::realtime()
    }
}
