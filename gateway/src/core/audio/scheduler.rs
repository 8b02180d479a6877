//! Jitter-tolerant inbound frame scheduler.
//!
//! Carriers deliver 20 ms frames at roughly 50 fps, but network jitter bunches
//! them up. The scheduler admits bursts up to a ceiling (nominal × 1.4) per
//! one-second window and drops anything beyond it. Frames are never queued, so a
//! misbehaving sender cannot build latency into the call.

use tokio::time::{Duration, Instant};
use tracing::{info, warn};

/// Nominal inbound frame rate for 20 ms frames.
pub const NOMINAL_FPS: u32 = 50;

/// Burst headroom over the nominal rate.
pub const CEILING_RATIO: f64 = 1.4;

const WINDOW: Duration = Duration::from_secs(1);

/// Admission decision for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    Forward,
    Drop,
}

/// Scheduler counters. `frames_forwarded + frames_dropped == frames_in` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_in: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
}

#[derive(Debug)]
pub struct FrameScheduler {
    call_id: String,
    ceiling_fps: u32,
    window_start: Option<Instant>,
    window_count: u32,
    stats: SchedulerStats,
    stopped: bool,
}

impl FrameScheduler {
    pub fn new(call_id: impl Into<String>, nominal_fps: u32, ceiling_ratio: f64) -> Self {
        let ceiling_fps = ((nominal_fps as f64) * ceiling_ratio).round().max(1.0) as u32;
        Self {
            call_id: call_id.into(),
            ceiling_fps,
            window_start: None,
            window_count: 0,
            stats: SchedulerStats::default(),
            stopped: false,
        }
    }

    /// Decide whether the frame received at `now` may be forwarded.
    ///
    /// This is a counter check only and never waits.
    pub fn offer(&mut self, now: Instant) -> FrameVerdict {
        self.stats.frames_in += 1;

        if self.stopped {
            self.stats.frames_dropped += 1;
            return FrameVerdict::Drop;
        }

        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < WINDOW => {}
            _ => {
                self.window_start = Some(now);
                self.window_count = 0;
            }
        }

        if self.window_count >= self.ceiling_fps {
            self.stats.frames_dropped += 1;
            if self.stats.frames_dropped == 1 || self.stats.frames_dropped % 50 == 0 {
                warn!(
                    call_id = %self.call_id,
                    ceiling_fps = self.ceiling_fps,
                    frames_dropped = self.stats.frames_dropped,
                    "Inbound frame rate above ceiling, dropping frames"
                );
            }
            return FrameVerdict::Drop;
        }

        self.window_count += 1;
        self.stats.frames_forwarded += 1;
        FrameVerdict::Forward
    }

    /// Stop admitting frames and log the final counters. Idempotent.
    pub fn stop(&mut self) -> SchedulerStats {
        if !self.stopped {
            self.stopped = true;
            info!(
                call_id = %self.call_id,
                frames_in = self.stats.frames_in,
                frames_forwarded = self.stats.frames_forwarded,
                frames_dropped = self.stats.frames_dropped,
                "Frame scheduler stopped"
            );
        }
        self.stats
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn ceiling_fps(&self) -> u32 {
        self.ceiling_fps
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic generator so jitter runs are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next_unit(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64) / ((1u64 << 53) as f64)
        }
    }

    fn assert_balanced(stats: SchedulerStats) {
        assert_eq!(stats.frames_forwarded + stats.frames_dropped, stats.frames_in);
    }

    #[test]
    fn test_ceiling_is_seventy_fps() {
        let scheduler = FrameScheduler::new("call", NOMINAL_FPS, CEILING_RATIO);
        assert_eq!(scheduler.ceiling_fps(), 70);
    }

    #[test]
    fn test_jittered_call_drops_nothing() {
        let mut scheduler = FrameScheduler::new("call", NOMINAL_FPS, CEILING_RATIO);
        let mut rng = Lcg(42);
        let mut now = Instant::now();
        let end = now + Duration::from_secs(60);

        while now < end {
            assert_eq!(scheduler.offer(now), FrameVerdict::Forward);
            // 20 ms ± 20 %
            let interval_us = 20_000.0 * (0.8 + 0.4 * rng.next_unit());
            now += Duration::from_micros(interval_us as u64);
        }

        let stats = scheduler.stats();
        assert!(stats.frames_in >= 2400);
        assert_eq!(stats.frames_dropped, 0);
        assert_balanced(stats);
    }

    #[test]
    fn test_sustained_overload_drops_frames() {
        let mut scheduler = FrameScheduler::new("call", NOMINAL_FPS, CEILING_RATIO);
        let mut now = Instant::now();

        // 100 fps for 3 seconds
        for _ in 0..300 {
            scheduler.offer(now);
            now += Duration::from_millis(10);
        }

        let stats = scheduler.stats();
        assert_eq!(stats.frames_in, 300);
        assert_eq!(stats.frames_forwarded, 210);
        assert_eq!(stats.frames_dropped, 90);
        assert_balanced(stats);
    }

    #[test]
    fn test_burst_within_window_is_admitted() {
        let mut scheduler = FrameScheduler::new("call", NOMINAL_FPS, CEILING_RATIO);
        let now = Instant::now();
        for _ in 0..70 {
            assert_eq!(scheduler.offer(now), FrameVerdict::Forward);
        }
        assert_eq!(scheduler.offer(now), FrameVerdict::Drop);
        assert_eq!(
            scheduler.offer(now + Duration::from_secs(1)),
            FrameVerdict::Forward
        );
    }

    #[test]
    fn test_stop_rejects_further_frames() {
        let mut scheduler = FrameScheduler::new("call", NOMINAL_FPS, CEILING_RATIO);
        let now = Instant::now();
        scheduler.offer(now);
        let stats = scheduler.stop();
        assert_eq!(stats.frames_forwarded, 1);

        assert_eq!(scheduler.offer(now), FrameVerdict::Drop);
        assert!(scheduler.is_stopped());
        let stats = scheduler.stop();
        assert_eq!(stats.frames_in, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_balanced(stats);
    }
}
