#[cfg(not(target_arch = "wasm32"))]
pub use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
pub use web_time::{Duration, Instant};

/// Renderer clock; feeds the time values of [`SceneUniforms`](crate::scene::SceneUniforms).
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    delta: Duration,
    elapsed: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    /// Marks the start of a frame.
    pub fn begin_frame(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_frame;
        self.elapsed = now - self.start;
        self.last_frame = now;
    }

    /// Seconds between the clock start and the current frame.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Seconds between the previous frame and the current one.
    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_advance_monotonically() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.elapsed_seconds(), 0.0);

        clock.begin_frame();
        let first = clock.elapsed_seconds();
        clock.begin_frame();
        assert!(clock.elapsed_seconds() >= first);
        assert!(clock.delta_seconds() >= 0.0);
    }
}
