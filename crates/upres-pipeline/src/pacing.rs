//! Output rate governor.
//!
//! [`RateGovernor::on_frame`] returns how long the caller should pause before
//! emitting the next frame:
//!
//! ```text
//! sleep = clamp(1 / target_fps - (now - last_emit), 0, 1 / target_fps)
//! ```
//!
//! `last_emit` is the instant the previous frame was scheduled to go out,
//! so a caller that sleeps the returned duration emits at a steady cadence.
//! The upper clamp keeps a caller that skips sleeps from accumulating debt.
//!
//! The source's native rate is asked for at most once per governor lifetime;
//! the latch is set even when the query yields nothing, and survives
//! [`RateGovernor::reset`].

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use upres_core::config::{MIN_TARGET_FPS, PacingConfig};

/// Throughput window length.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Run-scoped pacing counters.  Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub frames: u64,
    pub target_fps: f64,
    pub source_fps: Option<f64>,
    /// Throughput over the last completed window.
    pub measured_fps: Option<f64>,
}

#[derive(Debug)]
pub struct RateGovernor {
    configured_fps: f64,
    auto_fps: bool,
    detection_attempted: bool,
    source_fps: Option<f64>,
    last_emit: Option<Instant>,
    window_start: Option<Instant>,
    window_frames: u64,
    measured_fps: Option<f64>,
    frames: u64,
}

impl RateGovernor {
    /// `config` is expected to have passed [`PacingConfig::validate`];
    /// a rate outside the usable range falls back to the 30 fps default.
    pub fn new(config: &PacingConfig) -> Self {
        let configured_fps = if usable_rate(config.target_fps) {
            config.target_fps
        } else {
            PacingConfig::default().target_fps
        };
        Self {
            configured_fps,
            auto_fps: config.auto_fps,
            detection_attempted: false,
            source_fps: None,
            last_emit: None,
            window_start: None,
            window_frames: 0,
            measured_fps: None,
            frames: 0,
        }
    }

    /// Ask the source for its rate, once.  Later calls do not run `query`.
    pub fn detect_source_rate<F>(&mut self, query: F) -> f64
    where
        F: FnOnce() -> Option<f64>,
    {
        if self.detection_attempted {
            return self.target_fps();
        }
        self.detection_attempted = true;
        if !self.auto_fps {
            debug!(fps = self.configured_fps, "Source rate detection disabled");
            return self.target_fps();
        }
        match query() {
            Some(rate) if usable_rate(rate) => {
                info!(fps = rate, "Detected source frame rate");
                self.source_fps = Some(rate);
            }
            other => {
                warn!(
                    reported = ?other,
                    fps = self.configured_fps,
                    "Source frame rate unavailable; keeping configured rate"
                );
            }
        }
        self.target_fps()
    }

    pub fn detection_attempted(&self) -> bool {
        self.detection_attempted
    }

    pub fn target_fps(&self) -> f64 {
        self.source_fps.unwrap_or(self.configured_fps)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps())
    }

    pub fn on_frame(&mut self) -> Duration {
        self.on_frame_at(Instant::now())
    }

    /// [`on_frame`](Self::on_frame) with an explicit clock reading.
    pub fn on_frame_at(&mut self, now: Instant) -> Duration {
        self.frames += 1;
        self.roll_window(now);

        let period = self.frame_period();
        let sleep = match self.last_emit {
            None => Duration::ZERO,
            Some(last) => (last + period).saturating_duration_since(now).min(period),
        };
        self.last_emit = Some(now + sleep);
        sleep
    }

    fn roll_window(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.window_frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= THROUGHPUT_WINDOW {
            let fps = self.window_frames as f64 / elapsed.as_secs_f64();
            debug!(fps, frames = self.window_frames, "Output throughput");
            self.measured_fps = Some(fps);
            self.window_start = Some(now);
            self.window_frames = 0;
        }
    }

    pub fn metrics(&self) -> RunMetrics {
        RunMetrics {
            frames: self.frames,
            target_fps: self.target_fps(),
            source_fps: self.source_fps,
            measured_fps: self.measured_fps,
        }
    }

    /// Clear run counters for a stream restart.  The detection latch and any
    /// detected rate are kept.
    pub fn reset(&mut self) {
        self.last_emit = None;
        self.window_start = None;
        self.window_frames = 0;
        self.measured_fps = None;
        self.frames = 0;
    }
}

/// Finite and no slower than [`MIN_TARGET_FPS`], so `1 / rate` always fits
/// a `Duration`.
fn usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= MIN_TARGET_FPS
}

/// Sleep for `delay` unless `cancel` fires first.  Returns `false` when
/// cancelled.
pub async fn pace(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
