//! Frame rate reporting.

use std::time::Instant;

/// Counts presented frames and reports the rate about once per second.
pub struct FpsCounter {
    last_report: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            last_report: Instant::now(),
            frames: 0,
        }
    }

    /// Count one frame; returns the measured rate once per second.
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.last_report.elapsed();

        if elapsed.as_secs_f64() >= 1.0 {
            let fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.last_report = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
