// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

const REPORT_EVERY: Duration = Duration::from_secs(1);

/// Presented-frame counter with a once-per-second FPS report.
#[derive(Debug)]
pub struct FrameStats {
    window_frames: u32,
    total_frames: u64,
    window_start: Instant,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self {
            window_frames: 0,
            total_frames: 0,
            window_start: now,
        }
    }

    pub fn record_frame(&mut self) {
        self.window_frames = self.window_frames.saturating_add(1);
        self.total_frames += 1;
    }

    pub fn total(&self) -> u64 {
        self.total_frames
    }

    /// Returns the frame count of the last window once a second has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) < REPORT_EVERY {
            return None;
        }
        let fps = self.window_frames;
        self.window_frames = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Drops the partial window, e.g. while paused.
    pub fn restart(&mut self, now: Instant) {
        self.window_frames = 0;
        self.window_start = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_second() {
        let t0 = Instant::now();
        let mut stats = FrameStats::new(t0);
        for _ in 0..60 {
            stats.record_frame();
        }
        assert_eq!(stats.tick(t0 + Duration::from_millis(500)), None);
        assert_eq!(stats.tick(t0 + Duration::from_millis(1000)), Some(60));
        // window restarted
        assert_eq!(stats.tick(t0 + Duration::from_millis(1500)), None);
        stats.record_frame();
        assert_eq!(stats.tick(t0 + Duration::from_millis(2001)), Some(1));
        assert_eq!(stats.total(), 61);
    }

    #[test]
    fn restart_discards_partial_window() {
        let t0 = Instant::now();
        let mut stats = FrameStats::new(t0);
        stats.record_frame();
        stats.record_frame();
        stats.restart(t0 + Duration::from_millis(900));
        assert_eq!(stats.tick(t0 + Duration::from_millis(1200)), None);
        assert_eq!(stats.tick(t0 + Duration::from_millis(1900)), Some(0));
        assert_eq!(stats.total(), 2);
    }
}
