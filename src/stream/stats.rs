use crate::frame::FrameData;
use std::time::{Duration, Instant};

/// Counters for a single streaming session
#[derive(Debug, Clone, Default)]
pub struct StreamingStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
    pub keyframes: u64,
    pub started_at: Option<Instant>,
    pub last_frame_time: Option<Instant>,
}

impl StreamingStats {
    pub fn update_frame_stats(&mut self, frame: &FrameData) {
        let now = Instant::now();
        self.started_at.get_or_insert(now);
        self.last_frame_time = Some(now);
        self.frames_received += 1;
        self.bytes_received += frame.len() as u64;
        if frame.is_keyframe() {
            self.keyframes += 1;
        }
    }

    pub fn record_dropped_frames(&mut self, count: u64) {
        self.frames_dropped += count;
    }

    /// Mean rate between the first and the last received frame
    pub fn average_fps(&self) -> f64 {
        match (self.started_at, self.last_frame_time) {
            (Some(start), Some(last)) if self.frames_received > 1 => {
                let elapsed = last.duration_since(start).as_secs_f64();
                if elapsed > 0.0 {
                    (self.frames_received - 1) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn efficiency(&self) -> f64 {
        let total = self.frames_received + self.frames_dropped;
        if total > 0 {
            self.frames_received as f64 / total as f64
        } else {
            1.0
        }
    }
}

/// Frame rate over fixed reporting windows
#[derive(Debug, Clone)]
pub struct RateReporter {
    interval: Duration,
    window_start: Instant,
    frames_in_window: u64,
}

impl RateReporter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            window_start: start,
            frames_in_window: 0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames_in_window += 1;
    }

    /// Close the window once `interval` has passed, returning frames/s
    /// rounded to one decimal.
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        if self.interval.is_zero() {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let rate = self.frames_in_window as f64 / self.interval.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = now;
        Some((rate * 10.0).round() / 10.0)
    }
}
