// SPDX-License-Identifier: GPL-3.0-only

//! Frames-per-second accounting over a rolling window

use crate::constants::FPS_WINDOW;
use std::time::{Duration, Instant};

/// Counts presented frames and publishes a rate once per window
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Record one presented frame at `now`. Returns the new rate when a
    /// window has elapsed.
    pub fn frame(&mut self, now: Instant) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window {
            return None;
        }
        self.fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = Some(now);
        Some(self.fps)
    }

    /// Rate measured over the last complete window
    pub fn fps(&self) -> f32 {
        self.fps
    }
}
