//! Two-stage stream driver.
//!
//! ```text
//! ┌───────────────────────┐  ch(N)  ┌──────────────────────────┐
//! │ compute (blocking)    │────────►│ emit (async)             │
//! │ source → unit.process │         │ governor → pace → sink   │
//! └───────────────────────┘         └──────────────────────────┘
//! ```
//!
//! # Backpressure
//!
//! The channel is bounded; when pacing holds the emit stage back, the compute
//! stage blocks in `blocking_send` instead of reading ahead.
//!
//! # Shutdown
//!
//! 1. **End of stream**: the source returns `None`, the compute stage drops
//!    its sender, the emit stage drains and exits.
//! 2. **Cancellation**: both stages watch the `CancellationToken`; pacing
//!    sleeps are raced against it, so a pending sleep ends immediately.
//! 3. **Error**: the failing stage returns `Err` and the first error is
//!    reported.  A compute error only closes the channel, so frames computed
//!    before it are still emitted.  An emit error cancels the token.
//!
//! The sink is always flushed, including after cancellation.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use upres_core::config::PacingConfig;
use upres_core::error::{Result, UpresError};
use upres_core::frame::FrameBuffer;
use upres_core::stream_traits::{FrameSink, FrameSource};

use crate::chain::TierSelection;
use crate::metrics::UnitMetricsSnapshot;
use crate::pacing::{self, RateGovernor, RunMetrics};
use crate::unit::{Status, SuperResolutionUnit};

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Frames buffered between compute and emit.
    pub channel_capacity: usize,
    pub pacing: PacingConfig,
    /// `false` emits as fast as frames are computed; the governor still
    /// measures throughput.
    pub pace_output: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
            pacing: PacingConfig::default(),
            pace_output: true,
        }
    }
}

/// Summary of one stream run.
#[derive(Clone, Debug, Serialize)]
pub struct StreamReport {
    pub frames_read: u64,
    pub frames_emitted: u64,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub selection: Option<TierSelection>,
    pub unit: UnitMetricsSnapshot,
    pub pacing: RunMetrics,
}

struct Computed {
    frame: FrameBuffer,
    /// Set on the first message only: the source's answer to the rate query.
    source_rate: Option<Option<f64>>,
}

struct ComputeSummary {
    frames_read: u64,
}

struct EmitSummary {
    frames_emitted: u64,
    cancelled: bool,
    pacing: RunMetrics,
}

fn compute_stage<S: FrameSource>(
    source: &mut S,
    unit: &mut SuperResolutionUnit,
    tx: mpsc::Sender<Computed>,
    cancel: &CancellationToken,
) -> Result<ComputeSummary> {
    if !unit.is_initialized() {
        unit.initialize();
    }

    let mut frames_read = 0u64;
    let mut pending_rate: Option<Option<f64>> = None;
    loop {
        if cancel.is_cancelled() {
            debug!("Compute stage cancelled");
            break;
        }
        let Some(frame) = source.next_frame()? else {
            info!(frames = frames_read, "Compute stage: source exhausted");
            break;
        };
        frames_read += 1;
        if frames_read == 1 {
            pending_rate = Some(source.native_frame_rate());
        }

        let processed = unit.process(&frame);
        let Some(output) = processed.frame else {
            debug_assert_eq!(processed.status, Status::InvalidInput);
            continue;
        };
        let message = Computed {
            frame: output,
            source_rate: pending_rate.take(),
        };
        if tx.blocking_send(message).is_err() {
            if cancel.is_cancelled() {
                debug!("Compute stage: emit stage closed after cancellation");
                break;
            }
            return Err(UpresError::ChannelClosed);
        }
    }
    Ok(ComputeSummary { frames_read })
}

async fn emit_stage<K: FrameSink>(
    sink: &mut K,
    mut rx: mpsc::Receiver<Computed>,
    config: &StreamConfig,
    cancel: &CancellationToken,
) -> Result<EmitSummary> {
    let mut governor = RateGovernor::new(&config.pacing);
    let mut frames_emitted = 0u64;
    let mut cancelled = false;

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Emit stage cancelled");
                cancelled = true;
                break;
            }
            m = rx.recv() => match m {
                Some(m) => m,
                None => break,
            }
        };

        if let Some(rate) = message.source_rate {
            governor.detect_source_rate(|| rate);
        }
        let delay = governor.on_frame();
        if config.pace_output && !pacing::pace(delay, cancel).await {
            cancelled = true;
            break;
        }
        sink.emit(&message.frame)?;
        frames_emitted += 1;
    }

    Ok(EmitSummary {
        frames_emitted,
        cancelled,
        pacing: governor.metrics(),
    })
}

fn join_error(stage: &'static str, err: tokio::task::JoinError) -> UpresError {
    UpresError::PanicRecovered {
        stage,
        message: err.to_string(),
    }
}

/// Pull every frame from `source` through `unit` into `sink`.
///
/// The unit is initialized if needed and shut down at the end.
pub async fn run_stream<S, K>(
    mut source: S,
    mut unit: SuperResolutionUnit,
    mut sink: K,
    config: StreamConfig,
    cancel: CancellationToken,
) -> Result<StreamReport>
where
    S: FrameSource,
    K: FrameSink,
{
    config.pacing.validate()?;
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<Computed>(config.channel_capacity.max(1));

    let compute = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let result = compute_stage(&mut source, &mut unit, tx, &cancel);
            (unit, result)
        })
    };

    let emit = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = emit_stage(&mut sink, rx, &config, &cancel).await;
            if result.is_err() {
                cancel.cancel();
            }
            let flushed = sink.flush();
            (result, flushed)
        })
    };

    let emit_joined = emit.await;
    let compute_joined = compute.await;

    // Emit first: a sink failure surfaces in compute as `ChannelClosed`.
    let mut first_error: Option<UpresError> = None;
    let mut note = |e: UpresError| {
        error!(error = %e, code = e.error_code(), "Stream stage failed");
        if first_error.is_none() {
            first_error = Some(e);
        }
    };

    let emit_summary = match emit_joined {
        Ok((result, flushed)) => {
            let summary = result.map_err(&mut note).ok();
            if let Err(e) = flushed {
                note(e);
            }
            summary
        }
        Err(e) => {
            note(join_error("emit", e));
            None
        }
    };

    let (mut unit, compute_summary) = match compute_joined {
        Ok((unit, result)) => (Some(unit), result.map_err(&mut note).ok()),
        Err(e) => {
            note(join_error("compute", e));
            (None, None)
        }
    };
    let (selection, unit_metrics) = match unit.as_mut() {
        Some(unit) => (unit.selection().cloned(), unit.shutdown()),
        None => (None, UnitMetricsSnapshot::default()),
    };

    if let Some(e) = first_error {
        return Err(e);
    }

    let emit_summary = emit_summary.unwrap_or(EmitSummary {
        frames_emitted: 0,
        cancelled: true,
        pacing: RunMetrics::default(),
    });
    let report = StreamReport {
        frames_read: compute_summary.map_or(0, |s| s.frames_read),
        frames_emitted: emit_summary.frames_emitted,
        cancelled: emit_summary.cancelled || cancel.is_cancelled(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        selection,
        unit: unit_metrics,
        pacing: emit_summary.pacing,
    };
    if report.cancelled {
        warn!(
            frames_read = report.frames_read,
            frames_emitted = report.frames_emitted,
            "Stream cancelled"
        );
    } else {
        info!(
            frames_read = report.frames_read,
            frames_emitted = report.frames_emitted,
            elapsed_ms = report.elapsed_ms,
            measured_fps = ?report.pacing.measured_fps,
            "Stream complete"
        );
    }
    Ok(report)
}
