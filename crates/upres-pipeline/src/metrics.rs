use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Atomic counters for the super-resolution unit.
#[derive(Debug, Default)]
pub struct UnitMetrics {
    pub frames_processed: AtomicU64,
    pub fallback_frames: AtomicU64,
    pub invalid_inputs: AtomicU64,
    pub total_process_us: AtomicU64,
    pub peak_process_us: AtomicU64,
}

impl UnitMetrics {
    pub const fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            fallback_frames: AtomicU64::new(0),
            invalid_inputs: AtomicU64::new(0),
            total_process_us: AtomicU64::new(0),
            peak_process_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed_us: u64, fell_back: bool) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.fallback_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.total_process_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.peak_process_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UnitMetricsSnapshot {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let total = self.total_process_us.load(Ordering::Relaxed);
        UnitMetricsSnapshot {
            frames_processed: frames,
            fallback_frames: self.fallback_frames.load(Ordering::Relaxed),
            invalid_inputs: self.invalid_inputs.load(Ordering::Relaxed),
            avg_process_us: if frames > 0 { total / frames } else { 0 },
            peak_process_us: self.peak_process_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UnitMetricsSnapshot {
    pub frames_processed: u64,
    pub fallback_frames: u64,
    pub invalid_inputs: u64,
    pub avg_process_us: u64,
    pub peak_process_us: u64,
}

impl UnitMetricsSnapshot {
    pub fn report(&self) {
        info!(
            frames = self.frames_processed,
            fallback = self.fallback_frames,
            invalid = self.invalid_inputs,
            avg_us = self.avg_process_us,
            peak_us = self.peak_process_us,
            "Super-resolution unit metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::UnitMetrics;

    #[test]
    fn snapshot_aggregates_latency() {
        let m = UnitMetrics::new();
        m.record(100, false);
        m.record(300, true);
        m.record_invalid();
        let s = m.snapshot();
        assert_eq!(s.frames_processed, 2);
        assert_eq!(s.fallback_frames, 1);
        assert_eq!(s.invalid_inputs, 1);
        assert_eq!(s.avg_process_us, 200);
        assert_eq!(s.peak_process_us, 300);
    }
}
